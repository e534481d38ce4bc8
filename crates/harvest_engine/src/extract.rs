use chrono::Utc;
use harvest_core::CollectionRecord;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Turns a fetched page into at most one record.
///
/// `extract` may be called from several tasks at once and must not keep
/// state between calls.
pub trait Extractor: Send + Sync {
    fn extract(&self, body: &str, url: &str) -> Option<CollectionRecord>;

    /// A record must carry an id, a status and an absolute source URL.
    fn is_valid(&self, record: &CollectionRecord) -> bool {
        !record.id.trim().is_empty() && !record.status.trim().is_empty() && is_absolute(&record.url)
    }
}

fn is_absolute(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|url| url.has_host())
}

/// Reads gift pages shaped like `https://t.me/nft/<collection>-<number>`:
/// OpenGraph meta tags plus the `table.tgme_gift_table` attribute rows.
#[derive(Debug, Default, Clone)]
pub struct GiftPageExtractor;

/// Attributes that get their own column; every other table row lands in
/// `other_data`.
const KNOWN_ATTRIBUTES: [&str; 6] = ["Model", "Backdrop", "Symbol", "Rarity", "Owner", "Quantity"];

impl Extractor for GiftPageExtractor {
    fn extract(&self, body: &str, url: &str) -> Option<CollectionRecord> {
        let (collection, number) = gift_coordinates(url)?;
        let doc = Html::parse_document(body);

        let title = meta_content(&doc, &["og:title", "twitter:title"])
            .or_else(|| first_text(&doc, "title"));
        let image_url = meta_content(&doc, &["og:image", "twitter:image"]);
        let description = meta_content(&doc, &["og:description", "twitter:description"]);

        let mut attributes = description
            .as_deref()
            .map(description_attributes)
            .unwrap_or_default();
        for (key, value) in gift_table(&doc) {
            upsert_pair(&mut attributes, key, value);
        }
        let attribute = |key: &str| {
            attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        };

        let (quantity, total_supply) = parse_quantity(attribute("Quantity")).unwrap_or_default();
        let other_data = attributes
            .iter()
            .filter(|(key, value)| !KNOWN_ATTRIBUTES.contains(&key.as_str()) && !value.is_empty())
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("; ");

        let status = page_status(title.as_deref(), description.as_deref());
        let id = format!("{collection}-{number}");
        let title = title.unwrap_or_else(|| format!("{} #{number}", capitalize(&collection)));

        let record = CollectionRecord::new(id, url, status, Utc::now())
            .with_field("collection", collection)
            .with_field("gift_number", number)
            .with_field("title", title)
            .with_field("model", strip_percentages(attribute("Model")))
            .with_field("backdrop", strip_percentages(attribute("Backdrop")))
            .with_field("symbol", strip_percentages(attribute("Symbol")))
            .with_field("rarity", attribute("Rarity"))
            .with_field("owner", attribute("Owner"))
            .with_field("quantity", quantity)
            .with_field("total_supply", total_supply)
            .with_field("other_data", other_data)
            .with_field("image_url", image_url.unwrap_or_default());
        Some(record)
    }

    fn is_valid(&self, record: &CollectionRecord) -> bool {
        !record.id.trim().is_empty()
            && !record.status.trim().is_empty()
            && is_absolute(&record.url)
            && record.field_str("collection").is_some_and(|c| !c.is_empty())
    }
}

/// `(collection, number)` from the last path segment, e.g. `swisswatch-42`.
fn gift_coordinates(raw: &str) -> Option<(String, u64)> {
    let url = Url::parse(raw).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let (collection, number) = segment.rsplit_once('-')?;
    if collection.is_empty() || !collection.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((collection.to_string(), number.parse().ok()?))
}

fn meta_content(doc: &Html, properties: &[&str]) -> Option<String> {
    properties.iter().find_map(|property| {
        let selector = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
        doc.select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|content| content.trim().to_string())
    })
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Key: value` lines of a description.
fn description_attributes(description: &str) -> Vec<(String, String)> {
    description
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn gift_table(doc: &Html) -> Vec<(String, String)> {
    let (Ok(table_sel), Ok(row_sel), Ok(th_sel), Ok(td_sel)) = (
        Selector::parse("table.tgme_gift_table"),
        Selector::parse("tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };
    let Some(table) = doc.select(&table_sel).next() else {
        return Vec::new();
    };
    table
        .select(&row_sel)
        .filter_map(|row| {
            let key = row.select(&th_sel).next().map(element_text)?;
            let value = row.select(&td_sel).next().map(element_text)?;
            Some((key, strip_percentages(&value)))
        })
        .collect()
}

fn upsert_pair(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key, value)),
    }
}

/// Drops rarity tokens such as `1.2%`.
fn strip_percentages(value: &str) -> String {
    value
        .split_whitespace()
        .filter(|token| {
            token
                .strip_suffix('%')
                .map_or(true, |number| number.parse::<f64>().is_err())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"110 335/131 222 issued"` becomes `("110335/131222", "131222")`.
fn parse_quantity(text: &str) -> Option<(String, String)> {
    let (left, right) = text.split_once('/')?;
    let current: String = left
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit() || *c == ' ' || *c == ',')
        .filter(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let total: String = right
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ' ' || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    if current.is_empty() || total.is_empty() {
        return None;
    }
    Some((format!("{current}/{total}"), total))
}

fn page_status(title: Option<&str>, description: Option<&str>) -> &'static str {
    let text = format!("{} {}", title.unwrap_or(""), description.unwrap_or("")).to_lowercase();
    if text.contains("not found") {
        "deleted"
    } else if text.contains("private") || text.contains("unavailable") {
        "private"
    } else if title.is_some() {
        "active"
    } else {
        "unknown"
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

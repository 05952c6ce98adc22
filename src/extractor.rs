//! Structured extraction of location records from a directory page.
//!
//! Extraction is a walk section → table → row → cell. The primary matcher
//! knows the site's exact layout; the fallbacks are independent matchers that
//! only fill fields still missing, in order:
//!
//! 1. headings loosely matching a keyword set, scanning their container,
//! 2. every table on the page,
//! 3. free-text coordinate patterns (GPS only).

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

pub const SENTINEL: &str = "-";

/// Below this many bytes a page is either an error page or a suspected block.
pub const FULL_PAGE_LEN: usize = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDetail {
    pub url: String,
    pub location: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub gps_lat: String,
    pub gps_lng: String,
}

impl ExtractedDetail {
    /// Every field set to the sentinel.
    pub fn sentinel(url: &str) -> Self {
        ExtractedDetail {
            url: url.to_string(),
            location: SENTINEL.to_string(),
            city: SENTINEL.to_string(),
            state: SENTINEL.to_string(),
            postcode: SENTINEL.to_string(),
            gps_lat: SENTINEL.to_string(),
            gps_lng: SENTINEL.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        [&self.location, &self.city, &self.state, &self.postcode, &self.gps_lat, &self.gps_lng]
            .iter()
            .all(|v| v.as_str() == SENTINEL)
    }
}

/// One output row: the input office name plus what was extracted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeDetail {
    pub office: String,
    #[serde(flatten)]
    pub detail: ExtractedDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Location,
    City,
    State,
    Postcode,
    GpsLat,
    GpsLng,
}

#[derive(Debug, Default)]
struct PartialDetail {
    values: [Option<String>; 6],
}

impl PartialDetail {
    fn get(&self, field: Field) -> Option<&str> {
        self.values[field as usize].as_deref()
    }

    fn set(&mut self, field: Field, value: String) {
        self.values[field as usize] = Some(value);
    }

    fn fill(&mut self, field: Field, value: String) {
        if self.get(field).is_none() && !value.is_empty() && value != SENTINEL {
            self.set(field, value);
        }
    }

    fn missing_any(&self, fields: &[Field]) -> bool {
        fields.iter().any(|f| self.get(*f).is_none())
    }

    fn finish(mut self, url: &str) -> ExtractedDetail {
        let mut take = |f: Field| {
            self.values[f as usize]
                .take()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| SENTINEL.to_string())
        };
        ExtractedDetail {
            url: url.to_string(),
            location: take(Field::Location),
            city: take(Field::City),
            state: take(Field::State),
            postcode: take(Field::Postcode),
            gps_lat: take(Field::GpsLat),
            gps_lng: take(Field::GpsLng),
        }
    }
}

/// A logical section of the page and how to recognise its rows.
struct Section {
    title: &'static str,
    exact_labels: &'static [(&'static str, Field)],
    heading_keywords: &'static [&'static str],
    fields: &'static [Field],
    fuzzy_label: fn(&str) -> Option<Field>,
}

const LOCATION_SECTION: Section = Section {
    title: "Location Information",
    exact_labels: &[
        ("location", Field::Location),
        ("post office", Field::City),
        ("state", Field::State),
        ("postcode", Field::Postcode),
    ],
    heading_keywords: &["location", "address", "details"],
    fields: &[Field::Location, Field::City, Field::State, Field::Postcode],
    fuzzy_label: location_label,
};

const GPS_SECTION: Section = Section {
    title: "GPS Coordinate (Approximate)",
    exact_labels: &[("latitude", Field::GpsLat), ("longitude", Field::GpsLng)],
    heading_keywords: &["gps", "coordinate", "latitude", "longitude"],
    fields: &[Field::GpsLat, Field::GpsLng],
    fuzzy_label: gps_label,
};

fn location_label(label: &str) -> Option<Field> {
    if label.contains("location") {
        Some(Field::Location)
    } else if label.contains("office") || label.contains("city") {
        Some(Field::City)
    } else if label.contains("state") {
        Some(Field::State)
    } else if label.contains("postcode") || label.contains("postal") {
        Some(Field::Postcode)
    } else {
        None
    }
}

fn gps_label(label: &str) -> Option<Field> {
    if label.contains("latitude") || label.contains("lat") {
        Some(Field::GpsLat)
    } else if label.contains("longitude") || label.contains("lng") || label.contains("long") {
        Some(Field::GpsLng)
    } else {
        None
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static ANY_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2, h3, h4, h5, h6"));
static ALT_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2, h3, h4"));
static DATA_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table#t2"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LOOSE_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr, .row, .data-row"));
static LOOSE_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td, .col, .data-cell"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));

static LAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:latitude|lat)\b[\s:]+(-?\d+(?:\.\d+)?)").expect("valid regex")
});
static LNG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:longitude|lng|long)\b[\s:]+(-?\d+(?:\.\d+)?)").expect("valid regex")
});
static PAIR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d{1,3}\.\d+)\s*,\s*(-?\d{1,3}\.\d+)").expect("valid regex")
});

/// Text of an element with whitespace runs collapsed.
fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cells_of(row: ElementRef<'_>, cell: &Selector) -> Vec<String> {
    row.select(cell).map(text_of).collect()
}

/// Primary matcher: exact section title, its `.panel`, the `#t2` table,
/// two-cell rows with exact labels. Returns whether the section was found.
fn match_primary(document: &Html, section: &Section, detail: &mut PartialDetail) -> bool {
    let panel = document
        .select(&ANY_HEADING)
        .filter(|h| text_of(*h) == section.title)
        .find_map(|h| {
            h.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().classes().any(|c| c == "panel"))
        });
    let Some(panel) = panel else {
        return false;
    };

    for table in panel.select(&DATA_TABLE) {
        for row in table.select(&ROW) {
            let cells = cells_of(row, &CELL);
            if cells.len() != 2 {
                continue;
            }
            let label = cells[0].to_lowercase();
            if let Some((_, field)) = section.exact_labels.iter().find(|(l, _)| *l == label) {
                debug!("Primary row: \"{}\" => \"{}\"", label, cells[1]);
                detail.set(*field, cells[1].clone());
            }
        }
    }
    true
}

/// Fallback 1: headings whose text contains a section keyword; scan the
/// heading's parent for label/value rows.
fn match_alternate_containers(document: &Html, section: &Section, detail: &mut PartialDetail) {
    let containers = document
        .select(&ALT_HEADING)
        .filter(|h| {
            let text = text_of(*h).to_lowercase();
            section.heading_keywords.iter().any(|k| text.contains(k))
        })
        .filter_map(|h| h.parent().and_then(ElementRef::wrap));

    for container in containers {
        for row in container.select(&LOOSE_ROW) {
            let cells = cells_of(row, &LOOSE_CELL);
            if cells.len() < 2 {
                continue;
            }
            if let Some(field) = (section.fuzzy_label)(&cells[0].to_lowercase()) {
                detail.fill(field, cells[1].clone());
            }
        }
    }
}

/// Fallback 2: every two-or-more-cell row of every table on the page.
fn match_any_table(document: &Html, section: &Section, detail: &mut PartialDetail) {
    for table in document.select(&TABLE) {
        for row in table.select(&ROW) {
            let cells = cells_of(row, &CELL);
            if cells.len() < 2 {
                continue;
            }
            if let Some(field) = (section.fuzzy_label)(&cells[0].to_lowercase()) {
                detail.fill(field, cells[1].clone());
            }
        }
    }
}

/// Fallback 3: labelled or bare coordinate pairs in the page text.
fn match_coordinate_text(document: &Html, detail: &mut PartialDetail) {
    let text = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element())
        .text()
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(caps) = LAT_PATTERN.captures(&text) {
        detail.fill(Field::GpsLat, caps[1].to_string());
    }
    if let Some(caps) = LNG_PATTERN.captures(&text) {
        detail.fill(Field::GpsLng, caps[1].to_string());
    }
    if detail.get(Field::GpsLat).is_none() && detail.get(Field::GpsLng).is_none() {
        if let Some(caps) = PAIR_PATTERN.captures(&text) {
            detail.fill(Field::GpsLat, caps[1].to_string());
            detail.fill(Field::GpsLng, caps[2].to_string());
        }
    }
}

/// Extract the full field set from a page. Never fails: anything not found
/// is the sentinel.
pub fn extract(url: &str, body: &str) -> ExtractedDetail {
    let document = Html::parse_document(body);
    let mut detail = PartialDetail::default();

    for section in [&LOCATION_SECTION, &GPS_SECTION] {
        if !match_primary(&document, section, &mut detail) {
            debug!("No '{}' panel on {}", section.title, url);
        }
        if detail.missing_any(section.fields) {
            match_alternate_containers(&document, section, &mut detail);
        }
        if detail.missing_any(section.fields) {
            match_any_table(&document, section, &mut detail);
        }
    }
    if detail.missing_any(GPS_SECTION.fields) {
        match_coordinate_text(&document, &mut detail);
    }

    detail.finish(url)
}

/// What a body's length says about it before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    Full,
    /// Short, and a real error / not-found / redirect page. Not a block.
    GenuineErrorPage,
    /// Short with no error markers: probably a challenge.
    SuspectedBlock,
}

pub fn check_content(body: &str, full_page_len: usize) -> ContentCheck {
    if body.len() >= full_page_len {
        ContentCheck::Full
    } else if is_genuine_error_page(body) {
        ContentCheck::GenuineErrorPage
    } else {
        ContentCheck::SuspectedBlock
    }
}

pub fn is_genuine_error_page(body: &str) -> bool {
    let document = Html::parse_document(body);
    let title = document.select(&TITLE).next().map(text_of).unwrap_or_default().to_lowercase();
    let text = document
        .select(&BODY)
        .next()
        .map(text_of)
        .unwrap_or_default()
        .to_lowercase();

    title.contains("error")
        || ["error", "not found", "redirect"].iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://postcode.my/perlis-arau-kampung-titi-gajah-02600.html";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn test_primary_sections_exact() {
        let detail = extract(URL, &fixture("kampung_titi_gajah.html"));
        assert_eq!(
            detail,
            ExtractedDetail {
                url: URL.to_string(),
                location: "Kampung Titi Gajah".into(),
                city: "Arau".into(),
                state: "Perlis".into(),
                postcode: "02600".into(),
                gps_lat: "6.4414".into(),
                gps_lng: "100.2708".into(),
            }
        );
    }

    #[test]
    fn test_nothing_found_is_all_sentinel() {
        let detail = extract(URL, &fixture("unrelated.html"));
        assert_eq!(detail, ExtractedDetail::sentinel(URL));
        assert!(detail.is_empty());

        let detail = extract(URL, "");
        assert_eq!(detail, ExtractedDetail::sentinel(URL));
    }

    #[test]
    fn test_alternate_layout_uses_fallbacks() {
        let detail = extract(URL, &fixture("alternate_layout.html"));
        assert_eq!(detail.location, "Jalan Aspa");
        assert_eq!(detail.city, "Kuantan");
        assert_eq!(detail.state, "Pahang");
        assert_eq!(detail.postcode, "26080");
        assert_eq!(detail.gps_lat, "3.8077");
        assert_eq!(detail.gps_lng, "103.3260");
    }

    #[test]
    fn test_global_table_scan_skips_sentinel_values() {
        let html = r#"<html><body>
            <table><tr><td>Postal Code</td><td>-</td></tr></table>
            <table><tr><td>Postal Code</td><td>50000</td></tr>
                   <tr><td>City</td><td>Kuala Lumpur</td></tr></table>
        </body></html>"#;
        let detail = extract(URL, html);
        assert_eq!(detail.postcode, "50000");
        assert_eq!(detail.city, "Kuala Lumpur");
        assert_eq!(detail.location, SENTINEL);
    }

    #[test]
    fn test_coordinate_text_patterns() {
        let labelled = "<html><body><p>Lat: 2.1896 and Lng: 102.2501</p></body></html>";
        let detail = extract(URL, labelled);
        assert_eq!((detail.gps_lat.as_str(), detail.gps_lng.as_str()), ("2.1896", "102.2501"));

        let bare = "<html><body><p>Pin: 5.4164, 100.3327</p></body></html>";
        let detail = extract(URL, bare);
        assert_eq!((detail.gps_lat.as_str(), detail.gps_lng.as_str()), ("5.4164", "100.3327"));
    }

    #[test]
    fn test_fallbacks_do_not_override_primary() {
        let html = r#"<html><body>
            <div class="panel"><h3 class="panel-title-custom">Location Information</h3>
              <table id="t2"><tr><td>State</td><td>Perlis</td></tr></table></div>
            <table><tr><td>State</td><td>Kedah</td></tr></table>
        </body></html>"#;
        assert_eq!(extract(URL, html).state, "Perlis");
    }

    #[test]
    fn test_content_check() {
        let full = fixture("kampung_titi_gajah.html");
        assert_eq!(check_content(&full, FULL_PAGE_LEN), ContentCheck::Full);

        let not_found = "<html><head><title>Page Not Found</title></head>\
                         <body>The page was not found.</body></html>";
        assert_eq!(check_content(not_found, FULL_PAGE_LEN), ContentCheck::GenuineErrorPage);

        let challenge = "<html><head><title>Just a moment...</title></head>\
                         <body>Checking your browser.</body></html>";
        assert_eq!(check_content(challenge, FULL_PAGE_LEN), ContentCheck::SuspectedBlock);
    }

    #[test]
    fn test_office_detail_flattens() {
        let row = OfficeDetail { office: "Arau".into(), detail: ExtractedDetail::sentinel(URL) };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["office"], "Arau");
        assert_eq!(json["gps_lng"], "-");
        assert_eq!(json.as_object().unwrap().len(), 8);
    }
}

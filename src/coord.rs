//! Free-text latitude/longitude → signed decimal degrees.
//!
//! Accepted shapes (after symbol normalization):
//!   23°06'N, 113°18'E        hemisphere letter after the numerals
//!   N23°06′ E113°18′         hemisphere letter before the numerals
//!   北纬23度06分 东经113度18分
//!   23.1;113.3               bare decimal degrees, lat first

use std::sync::LazyLock;

use regex::Regex;
use specimen_types::Coordinate;
use tracing::debug;

use crate::cleaned::{Cells, Cleaned, Column, map_column, map_column_pair};

/// Degree block: up to three numbers (d, d m, d m s).
const BLOCK: &str = r"\d+(?:\.\d+)?(?:\s+\d+(?:\.\d+)?){0,2}";

static RE_PREFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"([NSEW])\s*({BLOCK})")).unwrap());

static RE_SUFFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"({BLOCK})\s*([NSEW])")).unwrap());

static RE_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?\d+(?:\.\d+)?)\s*(?:[,;/]\s*|\s+)([+-]?\d+(?:\.\d+)?)\s*$").unwrap()
});

const HEMISPHERE_WORDS: &[(&str, &str)] = &[
    ("北纬", " N "),
    ("北緯", " N "),
    ("南纬", " S "),
    ("南緯", " S "),
    ("东经", " E "),
    ("東經", " E "),
    ("西经", " W "),
    ("西經", " W "),
];

/// Uppercase, translate CJK hemisphere words, and turn every
/// degree/minute/second symbol into plain whitespace.
fn normalize(text: &str) -> String {
    let mut s = text.to_uppercase();
    for (word, letter) in HEMISPHERE_WORDS {
        s = s.replace(word, letter);
    }
    s.chars()
        .map(|c| match c {
            '°' | 'º' | '˚' | '′' | '\'' | '’' | '‘' | '″' | '"' | '“' | '”' | '度' | '分'
            | '秒' => ' ',
            '，' => ',',
            '；' => ';',
            _ => c,
        })
        .collect()
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Unsigned decimal degrees from a 1–3 part degree block.
fn parse_block(block: &str) -> Option<f64> {
    let parts: Vec<&str> = block.split_whitespace().collect();
    let num = |s: &str| s.parse::<f64>().ok();
    match parts.as_slice() {
        [d] => num(d),
        [d, m] => {
            if d.contains('.') {
                return None;
            }
            let (d, m) = (num(d)?, num(m)?);
            (m < 60.0).then_some(d + m / 60.0)
        }
        [d, m, s] => {
            if d.contains('.') || m.contains('.') {
                return None;
            }
            let (d, sec) = (num(d)?, num(s)?);
            if sec >= 60.0 {
                // 23 06 75 is a miswritten 23°06.75′
                let minutes: f64 = format!("{m}.{}", s.replace('.', "")).parse().ok()?;
                return (minutes < 60.0).then_some(d + minutes / 60.0);
            }
            let m = num(m)?;
            (m < 60.0).then_some(d + m / 60.0 + sec / 3600.0)
        }
        _ => None,
    }
}

/// Assign latitude/longitude by hemisphere letter and apply signs.
fn from_hemispheres(matches: [(char, &str); 2]) -> Option<Coordinate> {
    let is_lat = |c: char| c == 'N' || c == 'S';
    let (lat, lon) = match (is_lat(matches[0].0), is_lat(matches[1].0)) {
        (true, false) => (matches[0], matches[1]),
        (false, true) => (matches[1], matches[0]),
        _ => return None,
    };
    let lat_abs = parse_block(lat.1)?;
    let lon_abs = parse_block(lon.1)?;
    if lat_abs > 90.0 || lon_abs > 180.0 {
        return None;
    }
    let latitude = if lat.0 == 'S' { -lat_abs } else { lat_abs };
    let longitude = if lon.0 == 'W' { -lon_abs } else { lon_abs };
    Some(Coordinate {
        latitude: round6(latitude),
        longitude: round6(longitude),
    })
}

fn parse(text: &str) -> Option<Coordinate> {
    let norm = normalize(text);

    // a rejected pair falls through: the E closing LATITUDE reads as a prefix
    let prefixed: Vec<(char, &str)> = RE_PREFIXED
        .captures_iter(&norm)
        .filter_map(|c| Some((c.get(1)?.as_str().chars().next()?, c.get(2)?.as_str())))
        .collect();
    if let [a, b] = prefixed.as_slice()
        && let Some(c) = from_hemispheres([*a, *b])
    {
        return Some(c);
    }

    let suffixed: Vec<(char, &str)> = RE_SUFFIXED
        .captures_iter(&norm)
        .filter_map(|c| Some((c.get(2)?.as_str().chars().next()?, c.get(1)?.as_str())))
        .collect();
    if let [a, b] = suffixed.as_slice()
        && let Some(c) = from_hemispheres([*a, *b])
    {
        return Some(c);
    }

    let caps = RE_BARE.captures(&norm)?;
    let latitude: f64 = caps.get(1)?.as_str().parse().ok()?;
    let longitude: f64 = caps.get(2)?.as_str().parse().ok()?;
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }
    Some(Coordinate {
        latitude: round6(latitude),
        longitude: round6(longitude),
    })
}

/// Resolve one combined "lat;lon" cell.
pub fn resolve(text: &str) -> Option<Cleaned<Coordinate>> {
    if text.trim().is_empty() {
        return None;
    }
    Some(match parse(text) {
        Some(c) => Cleaned::Ok(c),
        None => {
            debug!(input = text, "coordinate not recognised");
            Cleaned::NeedsReview(text.to_string())
        }
    })
}

/// Resolve separate latitude and longitude fields.
pub fn resolve_pair(lat: Option<&str>, lon: Option<&str>) -> Option<Cleaned<Coordinate>> {
    match (lat, lon) {
        (None, None) => None,
        (Some(a), Some(b)) => resolve(&format!("{a};{b}")),
        // half a coordinate is never usable
        (Some(a), None) | (None, Some(a)) => Some(Cleaned::NeedsReview(a.to_string())),
    }
}

pub fn resolve_column(column: &Column) -> Vec<Option<Cleaned<Coordinate>>> {
    map_column(column, resolve)
}

pub fn resolve_columns(lat: &Column, lon: &Column) -> Vec<Option<Cleaned<Coordinate>>> {
    map_column_pair(lat, lon, resolve_pair)
}

impl Cells for Coordinate {
    const WIDTH: usize = 2;
    fn cells(&self) -> Vec<Option<String>> {
        vec![
            Some(self.latitude.to_string()),
            Some(self.longitude.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(text: &str) -> Coordinate {
        match resolve(text) {
            Some(Cleaned::Ok(c)) => c,
            other => panic!("{text:?} → {other:?}"),
        }
    }

    fn fails(text: &str) -> bool {
        matches!(resolve(text), Some(Cleaned::NeedsReview(_)))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_suffixed_degrees_minutes() {
        let c = ok("23°06'N, 113°18'E");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.3));
    }

    #[test]
    fn test_hemisphere_letters_negate() {
        let c = ok("23°06'S, 113°18'W");
        assert!(close(c.latitude, -23.1));
        assert!(close(c.longitude, -113.3));
    }

    #[test]
    fn test_prefixed_and_reversed_order() {
        let c = ok("N23°06′ E113°18′");
        assert!(close(c.latitude, 23.1));
        let c = ok("E113°18′30″; N23°06′");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.308333));
    }

    #[test]
    fn test_labelled_axes() {
        let c = ok("Latitude 23.1N, Longitude 113.3E");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.3));
        let c = ok("Lat 23.1N Long 113.3E");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.3));
    }

    #[test]
    fn test_cjk_hemisphere_words() {
        let c = ok("北纬23度06分 东经113度18分");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.3));
    }

    #[test]
    fn test_degrees_minutes_seconds() {
        let c = ok("23 06 36 N 113 18 00 E");
        assert!(close(c.latitude, 23.11));
        assert!(close(c.longitude, 113.3));
    }

    #[test]
    fn test_seconds_over_sixty_are_fractional_minutes() {
        // 23°06.75′ = 23.1125
        let c = ok("23°06'75\"N, 113°18'E");
        assert!(close(c.latitude, 23.1125));
    }

    #[test]
    fn test_bare_decimal_pair() {
        let c = ok("23.1, 113.3");
        assert!(close(c.latitude, 23.1));
        assert!(close(c.longitude, 113.3));
        let c = ok("-23.5 -46.6");
        assert!(close(c.latitude, -23.5));
        assert!(close(c.longitude, -46.6));
    }

    #[test]
    fn test_rounds_to_six_places() {
        let c = ok("23°00'01\"N, 113°E");
        assert_eq!(c.latitude, 23.000278);
    }

    #[test]
    fn test_inconsistent_inputs_fail() {
        // both latitude letters
        assert!(fails("23°N, 24°S"));
        // latitude out of range
        assert!(fails("95°N, 113°E"));
        // bare values never swap columns
        assert!(fails("113.3, 23.1"));
        // minutes out of range
        assert!(fails("23°75'N, 113°E"));
        assert!(fails("somewhere in Yunnan"));
    }

    #[test]
    fn test_pair_and_columns() {
        let c = resolve_pair(Some("23°06'N"), Some("113°18'E"));
        assert!(matches!(c, Some(Cleaned::Ok(_))));
        assert_eq!(resolve_pair(None, None), None);
        assert_eq!(
            resolve_pair(Some("23°06'N"), None),
            Some(Cleaned::NeedsReview("23°06'N".into()))
        );

        let lat: Column = vec![Some("23.1".into()), None, Some("!x".into())];
        let lon: Column = vec![Some("113.3".into()), None, Some("113".into())];
        let out = resolve_columns(&lat, &lon);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0], Some(Cleaned::Ok(_))));
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(Cleaned::NeedsReview("!x".into())));
    }
}

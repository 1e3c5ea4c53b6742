use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::subdivide::{Aliquot, Half, Quarter, Subdivision};
use super::GeoError;

static ALIQUOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(NE|NW|SE|SW|N|S|E|W)\s*(?:1\s*/\s*([24])|/\s*([24])|(¼)|(½))")
        .expect("aliquot regex")
});
static SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:section|sec\.?)\s*(\d{1,2})\b").expect("section regex"));
static TOWNSHIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bT(?:wp\.?|ownship)?\s*(\d{1,3})\s*([NS])(?:orth|outh)?\b")
        .expect("township regex")
});
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bR(?:ng\.?|ange)?\s*(\d{1,3})\s*([EW])(?:ast|est)?\b").expect("range regex")
});
/// Text allowed between two chained aliquot parts.
static CHAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[\s,]*(?:of\s+(?:the\s+)?)?$").expect("chain regex"));

/// A parsed PLSS description such as `E 1/2 of the SW 1/4 of Section 26, T12N, R5W`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegalDescription {
    pub section: Option<u32>,
    /// Township with direction, e.g. `12N`.
    pub township: Option<String>,
    /// Range with direction, e.g. `5W`.
    pub range: Option<String>,
    /// Aliquot parts in reading order, innermost first.
    pub parts: Vec<Aliquot>,
}

impl LegalDescription {
    /// Parts in the order they are applied to the section: outermost first.
    pub fn steps(&self) -> Vec<Aliquot> {
        self.parts.iter().rev().copied().collect()
    }

    pub fn subdivision(&self) -> Result<Subdivision, GeoError> {
        Subdivision::from_steps(&self.steps())
    }
}

fn aliquot_from(caps: &regex::Captures<'_>) -> Result<Aliquot, GeoError> {
    let dir = caps[1].to_ascii_uppercase();
    let denominator = match (caps.get(2).or(caps.get(3)), caps.get(4), caps.get(5)) {
        (Some(d), _, _) => d.as_str(),
        (None, Some(_), _) => "4",
        _ => "2",
    };
    match (dir.len(), denominator) {
        (2, "4") => Ok(Aliquot::Quarter(dir.parse::<Quarter>()?)),
        (1, "2") => Ok(Aliquot::Half(dir.parse::<Half>()?)),
        _ => Err(GeoError::Parse(format!(
            "{} is not a valid aliquot part",
            caps[0].trim()
        ))),
    }
}

pub fn parse_legal_description(text: &str) -> Result<LegalDescription, GeoError> {
    let mut parts = Vec::new();
    let mut last_end: Option<usize> = None;
    for caps in ALIQUOT_RE.captures_iter(text) {
        let whole = caps.get(0).ok_or_else(|| GeoError::Parse(text.to_string()))?;
        if let Some(end) = last_end {
            let between = &text[end..whole.start()];
            if !CHAIN_RE.is_match(between) {
                return Err(GeoError::Parse(format!(
                    "aliquot parts must be chained with \"of the\", found {:?}",
                    between.trim()
                )));
            }
        }
        parts.push(aliquot_from(&caps)?);
        last_end = Some(whole.end());
    }

    let section = SECTION_RE
        .captures(text)
        .and_then(|c| c[1].parse::<u32>().ok());
    if let Some(s) = section {
        if !(1..=36).contains(&s) {
            return Err(GeoError::Parse(format!("section {s} is outside 1..=36")));
        }
    }
    let township = TOWNSHIP_RE
        .captures(text)
        .map(|c| format!("{}{}", &c[1], c[2].to_ascii_uppercase()));
    let range = RANGE_RE
        .captures(text)
        .map(|c| format!("{}{}", &c[1], c[2].to_ascii_uppercase()));

    if parts.is_empty() && section.is_none() {
        return Err(GeoError::Parse(format!(
            "no aliquot parts or section found in {:?}",
            text.trim()
        )));
    }

    Ok(LegalDescription {
        section,
        township,
        range,
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_description() {
        let d = parse_legal_description("E 1/2 of the SW 1/4 of Section 26, T12N, R5W").unwrap();
        assert_eq!(d.section, Some(26));
        assert_eq!(d.township.as_deref(), Some("12N"));
        assert_eq!(d.range.as_deref(), Some("5W"));
        assert_eq!(
            d.parts,
            vec![Aliquot::Half(Half::E), Aliquot::Quarter(Quarter::SW)]
        );
        assert_eq!(
            d.steps(),
            vec![Aliquot::Quarter(Quarter::SW), Aliquot::Half(Half::E)]
        );
        let sub = d.subdivision().unwrap();
        assert_eq!(sub.quarter, Some(Quarter::SW));
        assert_eq!(sub.half, Some(Half::E));
    }

    #[test]
    fn accepts_compact_and_symbol_notation() {
        let d = parse_legal_description("NE1/4 NW/4 Sec. 3").unwrap();
        assert_eq!(
            d.parts,
            vec![Aliquot::Quarter(Quarter::NE), Aliquot::Quarter(Quarter::NW)]
        );
        let d = parse_legal_description("sw¼ of the n½ of section 9").unwrap();
        assert_eq!(
            d.parts,
            vec![Aliquot::Quarter(Quarter::SW), Aliquot::Half(Half::N)]
        );
        assert_eq!(d.section, Some(9));
    }

    #[test]
    fn township_and_range_long_forms() {
        let d = parse_legal_description("Section 4, Township 7 North, Range 12 East").unwrap();
        assert_eq!(d.township.as_deref(), Some("7N"));
        assert_eq!(d.range.as_deref(), Some("12E"));
        assert!(d.parts.is_empty());
    }

    #[test]
    fn rejects_mismatched_fractions_and_unchained_parts() {
        assert!(matches!(
            parse_legal_description("NE 1/2 of Section 4"),
            Err(GeoError::Parse(_))
        ));
        assert!(matches!(
            parse_legal_description("NE 1/4 and NW 1/4 of Section 4"),
            Err(GeoError::Parse(_))
        ));
        assert!(matches!(
            parse_legal_description("the old mill lot"),
            Err(GeoError::Parse(_))
        ));
    }
}

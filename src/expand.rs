//! Multi-product line expansion.
//!
//! Flyers often advertise one price for several interchangeable products
//! ("Picanha ou Alcatra"). The expander splits such a line into one
//! [`RawProduct`] per alternative so each is resolved and persisted
//! independently. It runs before resolution in the ingestion pipeline.

use regex_lite::Regex;

use crate::models::RawProduct;

/// Split a raw product on the conjunction word (case-insensitive, delimited
/// by whitespace). Each surviving part becomes a copy of the input with only
/// the name replaced. Lines without the conjunction come back unchanged as a
/// single element.
///
/// A malformed line where every part trims to empty falls back to the
/// original unsplit name rather than yielding zero products.
pub fn expand(raw: RawProduct, conjunction: &str) -> Vec<RawProduct> {
    let pattern = format!(r"(?i)\s+{}\s+", regex_lite::escape(conjunction));
    // The conjunction is a short config-provided word; a bad value is a
    // config bug, surfaced at load time by config validation.
    let re = Regex::new(&pattern).expect("invalid conjunction pattern");

    if !re.is_match(&raw.name) {
        return vec![raw];
    }

    let parts: Vec<String> = re
        .split(&raw.name)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        return vec![raw];
    }

    parts
        .into_iter()
        .map(|name| RawProduct {
            name,
            ..raw.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> RawProduct {
        RawProduct {
            name: name.to_string(),
            brand: None,
            category: Some("Carnes".to_string()),
            price: Some(10.5),
            original_price: None,
            on_promotion: false,
            unit: Some("kg".to_string()),
            note: None,
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_splits_two_alternatives() {
        let out = expand(raw("Picanha ou Alcatra"), "ou");
        let names: Vec<&str> = out.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Picanha", "Alcatra"]);
    }

    #[test]
    fn test_splits_three_alternatives() {
        let out = expand(raw("Guaraná ou Fanta ou Sprite"), "ou");
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].name, "Sprite");
    }

    #[test]
    fn test_copies_all_other_fields() {
        let out = expand(raw("Picanha ou Alcatra"), "ou");
        for p in &out {
            assert_eq!(p.price, Some(10.5));
            assert_eq!(p.unit.as_deref(), Some("kg"));
            assert_eq!(p.category.as_deref(), Some("Carnes"));
        }
    }

    #[test]
    fn test_no_conjunction_passes_through() {
        let out = expand(raw("Arroz"), "ou");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Arroz");
    }

    #[test]
    fn test_conjunction_inside_word_not_split() {
        // "Louro" and "Ouro" contain "ou" but not as a delimited word.
        let out = expand(raw("Folha de Louro"), "ou");
        assert_eq!(out.len(), 1);
        let out = expand(raw("Bombom Ouro Branco"), "ou");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_case_insensitive() {
        let out = expand(raw("Picanha OU Alcatra"), "ou");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_parts_filtered() {
        let out = expand(raw("Picanha ou  ou Alcatra"), "ou");
        let names: Vec<&str> = out.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Picanha", "Alcatra"]);
    }

    #[test]
    fn test_only_conjunction_falls_back_to_original() {
        // " ou " alone has no surrounding text; splitting would leave zero
        // parts, so the unsplit name is returned.
        let out = expand(raw(" x ou "), "ou");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "x");

        let degenerate = RawProduct {
            name: " ou ".to_string(),
            ..raw("")
        };
        let out = expand(degenerate, "ou");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, " ou ");
    }
}

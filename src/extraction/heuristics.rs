//! Rule-based category and manufacturer guesses used to fill blanks

use regex::Regex;
use std::sync::OnceLock;

pub const CATEGORY_FOOD: &str = "Running On Empty";
pub const CATEGORY_DRINK: &str = "Drink Review";
pub const CATEGORY_ENERGY: &str = "Energy Crisis";

/// Energy drinks are checked before drinks in general; food is the default
pub fn infer_category(title: &str, transcript: &str) -> &'static str {
    let haystack = format!("{}\n{}", title, transcript).to_lowercase();
    if haystack.contains("energy crisis") {
        CATEGORY_ENERGY
    } else if haystack.contains("drink review") {
        CATEGORY_DRINK
    } else {
        CATEGORY_FOOD
    }
}

struct BrandRule {
    name: &'static str,
    patterns: Vec<Regex>,
}

const BRAND_PATTERNS: &[(&str, &[&str])] = &[
    ("McDonald's", &[r"\bmcdonald'?s\b", r"\bmcdonalds\b"]),
    ("KFC", &[r"\bkfc\b", r"\bkentucky fried chicken\b"]),
    ("Burger King", &[r"\bburger king\b", r"\bbk\b"]),
    ("Taco Bell", &[r"\btaco bell\b"]),
    ("Wendy's", &[r"\bwendy'?s\b"]),
    ("Subway", &[r"\bsubway\b"]),
    ("Popeyes", &[r"\bpopeyes\b"]),
    ("Chick-fil-A", &[r"\bchick-?fil-?a\b"]),
    ("Domino's", &[r"\bdomino'?s\b"]),
    ("Pizza Hut", &[r"\bpizza hut\b"]),
    ("Starbucks", &[r"\bstarbucks\b"]),
    ("Dunkin'", &[r"\bdunkin'?\b", r"\bdunkin donuts\b"]),
];

fn brand_rules() -> &'static [BrandRule] {
    static RULES: OnceLock<Vec<BrandRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        BRAND_PATTERNS
            .iter()
            .map(|&(name, patterns)| BrandRule {
                name,
                patterns: patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
            })
            .collect()
    })
}

/// First brand whose pattern matches title, product, or transcript; empty when none do
pub fn infer_manufacturer(title: &str, product: &str, transcript: &str) -> &'static str {
    let haystack = format!("{}\n{}\n{}", title, product, transcript).to_lowercase();
    brand_rules()
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| p.is_match(&haystack)))
        .map_or("", |rule| rule.name)
}

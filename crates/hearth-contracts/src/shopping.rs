use serde::{Deserialize, Serialize};

/// Grounded product search cannot use a JSON schema (grounding and
/// structured output are mutually exclusive on the provider), so the raw
/// text is the contract: repeated `Product:` / `Price:` / `Store:` lines.
/// The extractor is best-effort; `text` is always kept as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingResult {
    pub text: String,
    pub sources: Vec<ShoppingSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProductListing {
    pub name: String,
    pub price: Option<String>,
    pub store: Option<String>,
}

impl ShoppingResult {
    pub fn listings(&self) -> Vec<ProductListing> {
        parse_product_listings(&self.text)
    }

    /// Best source link for a listing: a source whose title mentions the
    /// store, then one mentioning the product's first word, then the first
    /// source overall.
    pub fn source_for(&self, listing: &ProductListing) -> Option<&ShoppingSource> {
        let store = listing
            .store
            .as_deref()
            .map(str::to_lowercase)
            .filter(|value| !value.is_empty());
        let first_word = listing
            .name
            .split_whitespace()
            .next()
            .map(str::to_lowercase);
        self.sources
            .iter()
            .find(|source| {
                let title = source.title.to_lowercase();
                store
                    .as_deref()
                    .map(|store| title.contains(store))
                    .unwrap_or(false)
                    || first_word
                        .as_deref()
                        .map(|word| title.contains(word))
                        .unwrap_or(false)
            })
            .or_else(|| self.sources.first())
    }
}

/// Scan the line-oriented contract. A `Product:` line starts a new record;
/// `Price:` and `Store:` attach to the open one. Label matching is
/// case-insensitive and tolerates leading list markers.
pub fn parse_product_listings(text: &str) -> Vec<ProductListing> {
    let mut listings: Vec<ProductListing> = Vec::new();
    let mut current: Option<ProductListing> = None;

    for line in text.lines() {
        if let Some(name) = strip_label(line, "product:") {
            if let Some(open) = current.take() {
                if !open.name.is_empty() {
                    listings.push(open);
                }
            }
            current = Some(ProductListing {
                name,
                ..ProductListing::default()
            });
        } else if let Some(price) = strip_label(line, "price:") {
            if let Some(open) = current.as_mut() {
                open.price = Some(price);
            }
        } else if let Some(store) = strip_label(line, "store:") {
            if let Some(open) = current.as_mut() {
                open.store = Some(store);
            }
        }
    }

    if let Some(open) = current {
        if !open.name.is_empty() {
            listings.push(open);
        }
    }
    listings
}

fn strip_label(line: &str, label: &str) -> Option<String> {
    let lowered = line.to_lowercase();
    let at = lowered.find(label)?;
    let value = line[at + label.len()..].trim();
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_label_blocks() {
        let text = "Product: Kohler Highline Toilet\nPrice: $250\nStore: Home Depot\n\nProduct: Delta Trinsic Faucet\nPrice: $189\nStore: Lowe's";
        let listings = parse_product_listings(text);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "Kohler Highline Toilet");
        assert_eq!(listings[0].price.as_deref(), Some("$250"));
        assert_eq!(listings[0].store.as_deref(), Some("Home Depot"));
        assert_eq!(listings[1].store.as_deref(), Some("Lowe's"));
    }

    #[test]
    fn labels_match_case_insensitively_mid_line() {
        let text = "- PRODUCT: Ring Doorbell\n  price: $99\n  STORE: Amazon";
        let listings = parse_product_listings(text);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Ring Doorbell");
        assert_eq!(listings[0].price.as_deref(), Some("$99"));
        assert_eq!(listings[0].store.as_deref(), Some("Amazon"));
    }

    #[test]
    fn prose_without_labels_yields_no_listings() {
        let listings = parse_product_listings("Here are a few ideas for your bathroom refresh.");
        assert!(listings.is_empty());
    }

    #[test]
    fn orphan_price_lines_are_ignored() {
        let listings = parse_product_listings("Price: $40\nStore: Target");
        assert!(listings.is_empty());
    }

    #[test]
    fn source_matching_prefers_store_then_first_word() {
        let result = ShoppingResult {
            text: String::new(),
            sources: vec![
                ShoppingSource {
                    title: "Best vanities of 2025".to_string(),
                    uri: "https://example.com/vanities".to_string(),
                },
                ShoppingSource {
                    title: "Home Depot catalog".to_string(),
                    uri: "https://homedepot.example".to_string(),
                },
            ],
        };
        let by_store = ProductListing {
            name: "Glacier Bay Vanity".to_string(),
            price: None,
            store: Some("Home Depot".to_string()),
        };
        assert_eq!(
            result.source_for(&by_store).map(|s| s.uri.as_str()),
            Some("https://homedepot.example")
        );

        let by_word = ProductListing {
            name: "Vanities Deluxe 36in".to_string(),
            price: None,
            store: None,
        };
        assert_eq!(
            result.source_for(&by_word).map(|s| s.uri.as_str()),
            Some("https://example.com/vanities")
        );

        let neither = ProductListing {
            name: "Mystery Widget".to_string(),
            price: None,
            store: None,
        };
        assert_eq!(
            result.source_for(&neither).map(|s| s.uri.as_str()),
            Some("https://example.com/vanities")
        );
    }
}

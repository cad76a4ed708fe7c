use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: PriceRange,
    pub active: bool,
}

impl Service {
    /// Free services are walk-in only and never take a slot.
    pub fn is_walk_in(&self) -> bool {
        self.price.is_free()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceRange {
    pub min: i64,
    pub max: i64,
}

impl PriceRange {
    pub fn fixed(price: i64) -> Self {
        Self {
            min: price,
            max: price,
        }
    }

    pub fn is_free(&self) -> bool {
        self.min == 0 && self.max == 0
    }

    /// Parses admin input: either a single amount (`150000`) or a range
    /// (`50000-150000`). Amounts are whole numbers; spaces are ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.is_empty() {
            return None;
        }

        let (min, max) = match cleaned.split_once('-') {
            Some((lo, hi)) => (lo.parse::<i64>().ok()?, hi.parse::<i64>().ok()?),
            None => {
                let price = cleaned.parse::<i64>().ok()?;
                (price, price)
            }
        };

        if min < 0 || max < min {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn to_display(&self) -> String {
        if self.is_free() {
            "Free".to_string()
        } else if self.min == self.max {
            format!("{} UZS", self.min)
        } else {
            format!("{} - {} UZS", self.min, self.max)
        }
    }
}

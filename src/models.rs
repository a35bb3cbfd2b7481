use serde::Deserialize;

/// Separator between fields of the human-readable summaries.
pub const SUMMARY_DELIMITER: &str = " | ";

/// A detected circle in processed-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

impl Circle {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self { x, y, radius }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// Axis-aligned face detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One coin type with its two minting variants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CoinDenomination {
    pub name: String,
    pub value: f64,
    /// Reference radii in pixels at the processed resolution (old, new).
    pub radii: [f64; 2],
}

impl CoinDenomination {
    pub fn new(name: impl Into<String>, value: f64, old_radius: f64, new_radius: f64) -> Self {
        Self {
            name: name.into(),
            value,
            radii: [old_radius, new_radius],
        }
    }
}

/// Ordered, read-only set of denominations. Order matters: it breaks ties
/// between equally distant references and fixes the summary layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct CoinCatalog {
    entries: Vec<CoinDenomination>,
}

impl CoinCatalog {
    pub fn new(entries: Vec<CoinDenomination>) -> Self {
        Self { entries }
    }

    /// Colombian peso coins, radii measured at the processed resolution.
    pub fn colombian_peso() -> Self {
        Self::new(vec![
            CoinDenomination::new("50 COP", 50.0, 67.4, 63.0),
            CoinDenomination::new("100 COP", 100.0, 86.2, 75.2),
            CoinDenomination::new("200 COP", 200.0, 90.7, 89.6),
            CoinDenomination::new("500 COP", 500.0, 95.0, 87.8),
            CoinDenomination::new("1000 COP", 1000.0, 101.6, 98.9),
        ])
    }

    pub fn entries(&self) -> &[CoinDenomination] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&CoinDenomination> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CoinCatalog {
    fn default() -> Self {
        Self::colombian_peso()
    }
}

/// Per-frame coin counts. Reset at the start of every classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinTally {
    counts: Vec<usize>,
    unknown: usize,
    total: f64,
}

impl CoinTally {
    pub fn new(denominations: usize) -> Self {
        Self {
            counts: vec![0; denominations],
            unknown: 0,
            total: 0.0,
        }
    }

    pub fn reset(&mut self, denominations: usize) {
        self.counts.clear();
        self.counts.resize(denominations, 0);
        self.unknown = 0;
        self.total = 0.0;
    }

    pub(crate) fn record_match(&mut self, index: usize, value: f64) {
        self.counts[index] += 1;
        self.total += value;
    }

    pub(crate) fn record_unknown(&mut self) {
        self.unknown += 1;
    }

    pub fn count(&self, index: usize) -> usize {
        self.counts.get(index).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn unknown(&self) -> usize {
        self.unknown
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn matched(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Nonzero denominations in catalog order, then the total.
    pub fn summary(&self, catalog: &CoinCatalog) -> String {
        let mut fields: Vec<String> = catalog
            .entries()
            .iter()
            .zip(&self.counts)
            .filter(|(_, count)| **count > 0)
            .map(|(entry, count)| format!("{}: {}", entry.name, count))
            .collect();
        fields.push(format!("Total: {}", self.total));
        fields.join(SUMMARY_DELIMITER)
    }
}

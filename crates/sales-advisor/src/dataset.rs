//! Store Sales Dataset
//!
//! A snapshot of the store sales / price elasticity / promotions data,
//! embedded at compile time and parsed once at startup. The parsed dataset
//! is immutable: it is materialized into the SQL store exactly once and
//! only read afterwards.

use crate::error::{AdvisorError, Result};

const EMBEDDED_CSV: &str = include_str!("../data/store_sales.csv");

/// Column names of the sales table, in schema order
pub const COLUMNS: [&str; 7] = [
    "store_number",
    "sku",
    "product_class",
    "sold_date",
    "qty_sold",
    "total_sale_value",
    "on_promo",
];

/// One sales transaction
#[derive(Clone, Debug, PartialEq)]
pub struct SalesRecord {
    pub store_number: i64,
    pub sku: i64,
    pub product_class: i64,
    pub sold_date: String,
    pub qty_sold: i64,
    pub total_sale_value: f64,
    pub on_promo: bool,
}

/// The preloaded, read-only sales dataset
#[derive(Clone, Debug)]
pub struct Dataset {
    records: Vec<SalesRecord>,
}

impl Dataset {
    /// Parse the embedded snapshot
    pub fn embedded() -> Result<Self> {
        Self::from_csv(EMBEDDED_CSV)
    }

    /// Parse CSV text with the expected header
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate();

        let (_, header) = lines
            .next()
            .ok_or_else(|| AdvisorError::Dataset("empty dataset".into()))?;
        let expected = COLUMNS.join(",");
        if header.trim() != expected {
            return Err(AdvisorError::Dataset(format!(
                "unexpected header: {header}"
            )));
        }

        let mut records = Vec::new();
        for (lineno, line) in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(parse_record(line).map_err(|e| {
                AdvisorError::Dataset(format!("line {}: {}", lineno + 1, e))
            })?);
        }

        Ok(Self { records })
    }

    /// Column names of the sales table
    pub fn columns() -> &'static [&'static str] {
        &COLUMNS
    }

    /// All records
    pub fn records(&self) -> &[SalesRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_record(line: &str) -> std::result::Result<SalesRecord, String> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != COLUMNS.len() {
        return Err(format!("expected {} fields, got {}", COLUMNS.len(), fields.len()));
    }

    Ok(SalesRecord {
        store_number: parse_field(fields[0], "store_number")?,
        sku: parse_field(fields[1], "sku")?,
        product_class: parse_field(fields[2], "product_class")?,
        sold_date: fields[3].to_string(),
        qty_sold: parse_field(fields[4], "qty_sold")?,
        total_sale_value: parse_field(fields[5], "total_sale_value")?,
        on_promo: parse_field::<i64>(fields[6], "on_promo")? != 0,
    })
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> std::result::Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid {name}: {raw:?}"))
}

//! Receipt line items and their resolution bindings.

use serde::{Deserialize, Serialize};

use super::resolution::ResolutionOutcome;

/// A line item read off a receipt by the OCR pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Raw scanned code, if the OCR found one
    pub raw_code: Option<String>,
    /// Raw product description
    pub raw_name: String,
    /// Store where the receipt was issued
    pub establishment_id: String,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    /// Position of the line within its receipt
    pub line_index: u32,
}

impl LineItem {
    /// Create a line item with no price/quantity information.
    pub fn new(raw_code: Option<&str>, raw_name: &str, establishment_id: &str) -> Self {
        Self {
            raw_code: raw_code.map(str::to_string),
            raw_name: raw_name.to_string(),
            establishment_id: establishment_id.to_string(),
            price: None,
            quantity: None,
            line_index: 0,
        }
    }

    /// Set the line position.
    pub fn at_line(mut self, line_index: u32) -> Self {
        self.line_index = line_index;
        self
    }
}

/// The resolution result attached to one OCR line item.
///
/// Written once, in the same transaction as the ledger updates it depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptLineBinding {
    pub binding_id: String,
    pub receipt_id: Option<String>,
    pub line_index: u32,
    pub establishment_id: String,
    pub raw_code: Option<String>,
    pub raw_name: String,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub outcome: ResolutionOutcome,
    /// Fuzzy score, for fuzzy matches
    pub score: Option<f64>,
    pub created_at: String,
}

impl ReceiptLineBinding {
    /// Create a binding for `item`.
    pub fn new(receipt_id: Option<&str>, item: &LineItem, outcome: ResolutionOutcome) -> Self {
        Self {
            binding_id: uuid::Uuid::new_v4().to_string(),
            receipt_id: receipt_id.map(str::to_string),
            line_index: item.line_index,
            establishment_id: item.establishment_id.clone(),
            raw_code: item.raw_code.clone(),
            raw_name: item.raw_name.clone(),
            price: item.price,
            quantity: item.quantity,
            product_id: None,
            variant_id: None,
            outcome,
            score: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

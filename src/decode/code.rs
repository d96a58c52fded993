//! Decoded code types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Code format a payload was encoded with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code128,
    Code39,
    QrCode,
    DataMatrix,
    Other(String),
}

impl Symbology {
    /// True for the linear retail symbologies that carry GS1 product keys.
    ///
    /// Only these are looked up in the product store by default.
    pub fn is_product_code(&self) -> bool {
        matches!(
            self,
            Symbology::Ean13
                | Symbology::Ean8
                | Symbology::UpcA
                | Symbology::UpcE
                | Symbology::Code128
                | Symbology::Code39
        )
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbology::Ean13 => f.write_str("EAN13"),
            Symbology::Ean8 => f.write_str("EAN8"),
            Symbology::UpcA => f.write_str("UPCA"),
            Symbology::UpcE => f.write_str("UPCE"),
            Symbology::Code128 => f.write_str("CODE128"),
            Symbology::Code39 => f.write_str("CODE39"),
            Symbology::QrCode => f.write_str("QRCODE"),
            Symbology::DataMatrix => f.write_str("DATAMATRIX"),
            Symbology::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for Symbology {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();

        Ok(match normalized.as_str() {
            "EAN13" => Symbology::Ean13,
            "EAN8" => Symbology::Ean8,
            "UPCA" => Symbology::UpcA,
            "UPCE" => Symbology::UpcE,
            "CODE128" => Symbology::Code128,
            "CODE39" => Symbology::Code39,
            "QRCODE" | "QR" => Symbology::QrCode,
            "DATAMATRIX" => Symbology::DataMatrix,
            _ => Symbology::Other(s.to_string()),
        })
    }
}

/// Axis-aligned location of a code in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A code found in one frame.
///
/// Two codes are equal when their payloads are equal; symbology and
/// location are metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedCode {
    pub payload: String,
    pub symbology: Symbology,
    pub bbox: BoundingBox,
}

impl DecodedCode {
    pub fn new(payload: impl Into<String>, symbology: Symbology, bbox: BoundingBox) -> Self {
        Self {
            payload: payload.into(),
            symbology,
            bbox,
        }
    }

    /// Display label in `SYMBOLOGY: payload` form.
    pub fn label(&self) -> String {
        format!("{}: {}", self.symbology, self.payload)
    }
}

impl PartialEq for DecodedCode {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for DecodedCode {}

impl Hash for DecodedCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload.hash(state);
    }
}

//! Kubernetes resource quantity parsing
//!
//! Converts quantity strings such as `250m`, `1.5`, `2Gi` or `12345678n`
//! into plain numbers: CPU in cores, memory in GB.

use crate::error::SourceError;
use crate::models::BYTES_PER_GB;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity string into its numeric value in base units
pub fn parse_quantity(raw: &str) -> Result<f64, SourceError> {
    let value = raw.trim();
    let invalid = || SourceError::InvalidQuantity(raw.to_string());

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    // Decimal exponent form, e.g. "1e3" or "12E-2"
    if let Some(exponent) = suffix.strip_prefix(['e', 'E']) {
        if !exponent.is_empty() && exponent.parse::<i32>().is_ok() {
            return value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(invalid);
        }
    }

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => return Err(invalid()),
    };

    let number: f64 = number.parse().map_err(|_| invalid())?;
    if !number.is_finite() {
        return Err(invalid());
    }

    Ok(number * multiplier)
}

/// CPU quantity in cores
pub fn cpu_cores(quantity: &Quantity) -> Result<f64, SourceError> {
    parse_quantity(&quantity.0)
}

/// Memory quantity in GB
pub fn memory_gb(quantity: &Quantity) -> Result<f64, SourceError> {
    Ok(parse_quantity(&quantity.0)? / BYTES_PER_GB)
}

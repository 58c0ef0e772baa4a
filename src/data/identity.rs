use rust_decimal::Decimal;

use crate::data::types::{HalfType, MarketKind};

/// Handicap labels as stored against a market row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandicapLabels {
    pub home: Option<String>,
    pub away: Option<String>,
    /// 0 = none or pick'em, 1 = home concedes, 2 = away concedes
    pub side: u8,
}

/// Derive the stable market identity for (event, kind, half, line).
///
/// The key `"{event}_{kind}_{half}_{line}"` is hashed with BKDR (seed 131)
/// over UTF-16 code units in 32-bit wrapping arithmetic, then made
/// non-negative. Collisions are possible and not detected.
pub fn derive_id(event_id: i64, kind: MarketKind, half: HalfType, line: Option<Decimal>) -> u32 {
    let key = format!(
        "{}_{}_{}_{}",
        event_id,
        kind.code(),
        half.code(),
        line.unwrap_or(Decimal::ZERO)
    );
    bkdr_hash(&key).unsigned_abs()
}

fn bkdr_hash(key: &str) -> i32 {
    const SEED: i32 = 131;
    key.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(SEED).wrapping_add(unit as i32))
}

/// Split a handicap line into home/away labels and the conceding side.
pub fn normalize_handicap(kind: MarketKind, line: Option<Decimal>) -> HandicapLabels {
    let line = match (kind, line) {
        (MarketKind::Handicap, Some(line)) => line,
        _ => {
            return HandicapLabels {
                home: None,
                away: None,
                side: 0,
            }
        }
    };

    if line > Decimal::ZERO {
        HandicapLabels {
            home: Some(line.to_string()),
            away: Some("-".to_string()),
            side: 1,
        }
    } else if line < Decimal::ZERO {
        HandicapLabels {
            home: Some("-".to_string()),
            away: Some(line.abs().to_string()),
            side: 2,
        }
    } else {
        HandicapLabels {
            home: Some("0".to_string()),
            away: Some("0".to_string()),
            side: 0,
        }
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::identity::{derive_id, normalize_handicap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Handicap,
    OverUnder,
    MoneyLine,
    CorrectScore,
    HalfFullTime,
    OddEven,
    TotalGoals,
}

impl MarketKind {
    /// Numeric wager type code used in identity keys and storage rows
    pub fn code(&self) -> i16 {
        match self {
            MarketKind::Handicap => 1,
            MarketKind::OverUnder => 2,
            MarketKind::MoneyLine => 3,
            MarketKind::CorrectScore => 4,
            MarketKind::HalfFullTime => 5,
            MarketKind::OddEven => 6,
            MarketKind::TotalGoals => 7,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(MarketKind::Handicap),
            2 => Some(MarketKind::OverUnder),
            3 => Some(MarketKind::MoneyLine),
            4 => Some(MarketKind::CorrectScore),
            5 => Some(MarketKind::HalfFullTime),
            6 => Some(MarketKind::OddEven),
            7 => Some(MarketKind::TotalGoals),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HalfType {
    FullTime,
    FirstHalf,
    SecondHalf,
}

impl HalfType {
    pub fn code(&self) -> u8 {
        match self {
            HalfType::FullTime => 0,
            HalfType::FirstHalf => 1,
            HalfType::SecondHalf => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Suspended,
}

impl MarketStatus {
    pub fn code(&self) -> i16 {
        match self {
            MarketStatus::Open => 1,
            MarketStatus::Suspended => -1,
        }
    }
}

/// One odds update as delivered by the feed, already deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub source_match_id: String,
    pub kind: MarketKind,
    pub half: HalfType,
    /// Handicap value or over/under line
    pub line: Option<Decimal>,
    /// Home / over / home-win
    pub odds1: Decimal,
    /// Away / under / away-win
    pub odds2: Decimal,
    /// Draw, moneyline only
    pub odds3: Option<Decimal>,
    pub suspended: bool,
    pub source_time: DateTime<Utc>,
}

/// Latest known state of one market. Values are never mutated once built;
/// the cache swaps whole snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: u32,
    pub event_id: i64,
    pub half: HalfType,
    pub kind: MarketKind,

    pub home_hdp: Option<String>,
    pub away_hdp: Option<String>,
    pub hdp_side: u8,
    pub home_hdp_odds: Decimal,
    pub away_hdp_odds: Decimal,

    pub ou_line: Option<String>,
    pub over_odds: Decimal,
    pub under_odds: Decimal,

    pub home_odds: Decimal,
    pub draw_odds: Decimal,
    pub away_odds: Decimal,

    pub status: MarketStatus,
    pub dirty: bool,
    pub source_time: DateTime<Utc>,
    pub local_update: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build the snapshot a quote describes. Odds land only in the fields of
    /// the quote's own market family; every other family stays zero.
    pub fn from_quote(event_id: i64, quote: &Quote, dirty: bool, now: DateTime<Utc>) -> Self {
        let id = derive_id(event_id, quote.kind, quote.half, quote.line);
        let hdp = normalize_handicap(quote.kind, quote.line);

        let family = |kind: MarketKind, odds: Decimal| {
            if quote.kind == kind {
                odds
            } else {
                Decimal::ZERO
            }
        };

        Self {
            id,
            event_id,
            half: quote.half,
            kind: quote.kind,
            home_hdp: hdp.home,
            away_hdp: hdp.away,
            hdp_side: hdp.side,
            home_hdp_odds: family(MarketKind::Handicap, quote.odds1),
            away_hdp_odds: family(MarketKind::Handicap, quote.odds2),
            ou_line: match quote.kind {
                MarketKind::OverUnder => quote.line.map(|l| l.to_string()),
                _ => None,
            },
            over_odds: family(MarketKind::OverUnder, quote.odds1),
            under_odds: family(MarketKind::OverUnder, quote.odds2),
            home_odds: family(MarketKind::MoneyLine, quote.odds1),
            draw_odds: family(MarketKind::MoneyLine, quote.odds3.unwrap_or(Decimal::ZERO)),
            away_odds: family(MarketKind::MoneyLine, quote.odds2),
            status: if quote.suspended {
                MarketStatus::Suspended
            } else {
                MarketStatus::Open
            },
            dirty,
            source_time: quote.source_time,
            local_update: now,
        }
    }

    /// Same market state with a different dirty flag.
    pub fn with_dirty(self, dirty: bool) -> Self {
        Self { dirty, ..self }
    }
}

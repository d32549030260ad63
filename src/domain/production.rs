//! Sugarcane deliveries and their path to tokenization.
//!
//! `registered -> validated -> tokenized -> distributed -> completed`, with
//! `rejected` reachable from the first two states and terminal.

use crate::domain::profile::ReportLimits;
use crate::domain::split::{Distribution, RevenueSplit};
use crate::domain::transaction::ChainReceipt;
use crate::domain::{invalid, round6, DomainError};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// tCO2e credited per tonne of processed cane.
pub const DEFAULT_CO2_FACTOR: f64 = 1.47;
pub const DEFAULT_TOKEN_PRICE_CENTS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
pub enum Quality {
    A,
    #[default]
    B,
    C,
    D,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::A => "A",
            Quality::B => "B",
            Quality::C => "C",
            Quality::D => "D",
        }
    }
}

impl FromStr for Quality {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Quality::A),
            "B" => Ok(Quality::B),
            "C" => Ok(Quality::C),
            "D" => Ok(Quality::D),
            other => Err(invalid(format!("unknown quality grade '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Registered,
    Validated,
    Tokenized,
    Distributed,
    Completed,
    Rejected,
}

impl ProductionStatus {
    pub const ALL: [ProductionStatus; 6] = [
        ProductionStatus::Registered,
        ProductionStatus::Validated,
        ProductionStatus::Tokenized,
        ProductionStatus::Distributed,
        ProductionStatus::Completed,
        ProductionStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Registered => "registered",
            ProductionStatus::Validated => "validated",
            ProductionStatus::Tokenized => "tokenized",
            ProductionStatus::Distributed => "distributed",
            ProductionStatus::Completed => "completed",
            ProductionStatus::Rejected => "rejected",
        }
    }

    pub fn can_move_to(&self, next: ProductionStatus) -> bool {
        use ProductionStatus::*;
        matches!(
            (self, next),
            (Registered, Validated)
                | (Registered, Rejected)
                | (Validated, Rejected)
                | (Validated, Tokenized)
                | (Tokenized, Distributed)
                | (Distributed, Completed)
        )
    }
}

impl fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown production status '{}'", s)))
    }
}

/// Conversion and pricing constants in force when a production is registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tokenomics {
    pub co2_factor: f64,
    pub token_price_cents: i64,
    pub split: RevenueSplit,
}

impl Default for Tokenomics {
    fn default() -> Self {
        Self {
            co2_factor: DEFAULT_CO2_FACTOR,
            token_price_cents: DEFAULT_TOKEN_PRICE_CENTS,
            split: RevenueSplit::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFigures {
    pub co2_equivalent: f64,
    pub tokens: f64,
    pub value_cents: i64,
    pub distribution: Distribution,
}

/// CO2 equivalent, token count (1:1 with CO2), value and split for a tonnage.
pub fn derive_figures(tonnage: f64, tokenomics: &Tokenomics) -> DerivedFigures {
    let co2_equivalent = round6(tonnage * tokenomics.co2_factor);
    let tokens = co2_equivalent;
    let value_cents = token_value_cents(tokens, tokenomics.token_price_cents);
    DerivedFigures {
        co2_equivalent,
        tokens,
        value_cents,
        distribution: Distribution::compute(tokenomics.split, value_cents),
    }
}

pub fn token_value_cents(quantity: f64, price_cents: i64) -> i64 {
    (quantity * price_cents as f64).round() as i64
}

/// Harvest season label for a delivery date, e.g. `2024-2025`.
pub fn season_for(date: NaiveDate) -> String {
    format!("{}-{}", date.year(), date.year() + 1)
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProductionInput {
    pub farmer_id: Uuid,
    #[schema(value_type = String, format = Date)]
    pub delivered_on: NaiveDate,
    pub tonnage: f64,
    #[serde(default)]
    pub quality: Option<Quality>,
    pub humidity: f64,
    #[serde(default)]
    pub purity: Option<f64>,
    #[serde(default)]
    pub harvest_lot: Option<String>,
    #[serde(default)]
    pub harvested_hectares: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ProductionInput {
    pub fn validate(&self, limits: &ReportLimits) -> Result<(), DomainError> {
        if !(self.tonnage > 0.0) {
            return Err(invalid("tonnage must be greater than zero"));
        }
        if self.tonnage < limits.min_tonnes || self.tonnage > limits.max_tonnes {
            return Err(invalid(format!(
                "tonnage {} is outside the mill's reporting range {}..={}",
                self.tonnage, limits.min_tonnes, limits.max_tonnes
            )));
        }
        if !(0.0..=100.0).contains(&self.humidity) {
            return Err(invalid("humidity must be between 0 and 100"));
        }
        if self.humidity > limits.max_humidity {
            return Err(invalid(format!(
                "humidity {} exceeds the mill's maximum of {}",
                self.humidity, limits.max_humidity
            )));
        }
        if let Some(purity) = self.purity {
            if !(0.0..=100.0).contains(&purity) {
                return Err(invalid("purity must be between 0 and 100"));
            }
        }
        if matches!(self.harvested_hectares, Some(h) if !(h > 0.0)) {
            return Err(invalid("harvested_hectares must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub quality_checked: bool,
    pub weight_checked: bool,
    pub documents_checked: bool,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Production {
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub mill_id: Uuid,
    pub delivered_on: NaiveDate,
    pub season: String,
    pub tonnage: f64,
    pub quality: Quality,
    pub humidity: f64,
    pub purity: Option<f64>,
    pub harvest_lot: Option<String>,
    pub harvested_hectares: Option<f64>,
    pub notes: Option<String>,
    pub co2_factor: f64,
    pub co2_equivalent: f64,
    pub tokens_generated: f64,
    pub token_price_cents: i64,
    pub value_cents: i64,
    pub distribution: Distribution,
    pub status: ProductionStatus,
    pub checks: VerificationChecks,
    pub chain: Option<ChainReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Production {
    /// Builds a `registered` production, deriving every computed field once.
    /// Input must already have passed [`ProductionInput::validate`].
    pub fn register(
        input: ProductionInput,
        mill_id: Uuid,
        tokenomics: &Tokenomics,
        now: DateTime<Utc>,
    ) -> Self {
        let figures = derive_figures(input.tonnage, tokenomics);
        Self {
            id: Uuid::new_v4(),
            farmer_id: input.farmer_id,
            mill_id,
            season: season_for(input.delivered_on),
            delivered_on: input.delivered_on,
            tonnage: input.tonnage,
            quality: input.quality.unwrap_or_default(),
            humidity: input.humidity,
            purity: input.purity,
            harvest_lot: input.harvest_lot,
            harvested_hectares: input.harvested_hectares,
            notes: input.notes,
            co2_factor: tokenomics.co2_factor,
            co2_equivalent: figures.co2_equivalent,
            tokens_generated: figures.tokens,
            token_price_cents: tokenomics.token_price_cents,
            value_cents: figures.value_cents,
            distribution: figures.distribution,
            status: ProductionStatus::Registered,
            checks: VerificationChecks::default(),
            chain: None,
            mint_claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: ProductionStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_move_to(next) {
            return Err(DomainError::Transition {
                entity: "production",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn validate(&mut self, validated_by: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ProductionStatus::Validated, now)?;
        self.checks = VerificationChecks {
            quality_checked: true,
            weight_checked: true,
            documents_checked: true,
            validated_by: Some(validated_by),
            validated_at: Some(now),
        };
        Ok(())
    }

    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(invalid("a rejection reason is required"));
        }
        self.transition(ProductionStatus::Rejected, now)?;
        let previous = self.notes.take().unwrap_or_default();
        self.notes = Some(format!("REJECTED: {}. {}", reason, previous).trim_end().to_string());
        Ok(())
    }

    pub fn mark_tokenized(&mut self, receipt: ChainReceipt, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ProductionStatus::Tokenized, now)?;
        self.chain = Some(receipt);
        self.mint_claimed_at = None;
        Ok(())
    }

    /// Mirrors a token's payout state onto the production: `distributed`
    /// once any party has been paid, `completed` once all have.
    pub fn record_payouts(&mut self, distribution: &Distribution, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.distribution = distribution.clone();
        if distribution.any_transferred() && self.status == ProductionStatus::Tokenized {
            self.transition(ProductionStatus::Distributed, now)?;
        }
        if distribution.fully_transferred() && self.status == ProductionStatus::Distributed {
            self.transition(ProductionStatus::Completed, now)?;
        }
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductionStats {
    pub count: u64,
    pub total_tonnes: f64,
    pub avg_tonnes: f64,
    pub total_co2: f64,
    pub total_tokens: f64,
    pub by_status: BTreeMap<ProductionStatus, u64>,
}

impl ProductionStats {
    pub fn from_records(records: &[Production]) -> Self {
        let mut stats = ProductionStats::default();
        for p in records {
            stats.count += 1;
            stats.total_tonnes += p.tonnage;
            stats.total_co2 += p.co2_equivalent;
            stats.total_tokens += p.tokens_generated;
            *stats.by_status.entry(p.status).or_default() += 1;
        }
        stats.total_tonnes = round6(stats.total_tonnes);
        stats.total_co2 = round6(stats.total_co2);
        stats.total_tokens = round6(stats.total_tokens);
        if stats.count > 0 {
            stats.avg_tonnes = round6(stats.total_tonnes / stats.count as f64);
        }
        stats
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn input(farmer_id: Uuid, tonnage: f64) -> ProductionInput {
        ProductionInput {
            farmer_id,
            delivered_on: NaiveDate::from_ymd_opt(2024, 9, 14).unwrap(),
            tonnage,
            quality: Some(Quality::A),
            humidity: 12.0,
            purity: Some(88.0),
            harvest_lot: Some("L-17".into()),
            harvested_hectares: Some(2.0),
            notes: Some("lote norte".into()),
        }
    }
}

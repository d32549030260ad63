//! Corporate greenhouse-gas footprints (scope 1/2/3) and the compensation
//! target derived from them.

use crate::domain::{invalid, round6, DomainError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MIN_YEAR: i32 = 2020;
pub const MAX_YEAR: i32 = 2050;

/// tCO2e per MWh of grid electricity.
pub const ELECTRICITY_FACTOR: f64 = 0.5;
pub const NATURAL_GAS_FACTOR: f64 = 2.03;
pub const DIESEL_FACTOR: f64 = 2.68;
pub const GASOLINE_FACTOR: f64 = 2.31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportingPeriod {
    Annual,
    Semiannual,
    Quarterly,
    Monthly,
}

impl ReportingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingPeriod::Annual => "annual",
            ReportingPeriod::Semiannual => "semiannual",
            ReportingPeriod::Quarterly => "quarterly",
            ReportingPeriod::Monthly => "monthly",
        }
    }
}

impl FromStr for ReportingPeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annual" => Ok(ReportingPeriod::Annual),
            "semiannual" => Ok(ReportingPeriod::Semiannual),
            "quarterly" => Ok(ReportingPeriod::Quarterly),
            "monthly" => Ok(ReportingPeriod::Monthly),
            other => Err(invalid(format!("unknown reporting period '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FootprintStatus {
    Draft,
    Review,
    Validation,
    Approved,
    Published,
    Archived,
}

impl FootprintStatus {
    pub const ALL: [FootprintStatus; 6] = [
        FootprintStatus::Draft,
        FootprintStatus::Review,
        FootprintStatus::Validation,
        FootprintStatus::Approved,
        FootprintStatus::Published,
        FootprintStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FootprintStatus::Draft => "draft",
            FootprintStatus::Review => "review",
            FootprintStatus::Validation => "validation",
            FootprintStatus::Approved => "approved",
            FootprintStatus::Published => "published",
            FootprintStatus::Archived => "archived",
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, FootprintStatus::Draft | FootprintStatus::Review)
    }
}

impl fmt::Display for FootprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FootprintStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FootprintStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown footprint status '{}'", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Scope1 {
    pub stationary_combustion: f64,
    pub mobile_combustion: f64,
    pub industrial_processes: f64,
    pub fugitive_emissions: f64,
}

impl Scope1 {
    pub fn total(&self) -> f64 {
        self.stationary_combustion + self.mobile_combustion + self.industrial_processes + self.fugitive_emissions
    }

    fn values(&self) -> [f64; 4] {
        [
            self.stationary_combustion,
            self.mobile_combustion,
            self.industrial_processes,
            self.fugitive_emissions,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Scope2 {
    pub electricity: f64,
    pub steam: f64,
    pub heating: f64,
}

impl Scope2 {
    pub fn total(&self) -> f64 {
        self.electricity + self.steam + self.heating
    }

    fn values(&self) -> [f64; 3] {
        [self.electricity, self.steam, self.heating]
    }
}

/// The fifteen GHG Protocol value-chain categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Scope3 {
    pub purchased_goods: f64,
    pub capital_goods: f64,
    pub fuel_and_energy: f64,
    pub upstream_transport: f64,
    pub waste: f64,
    pub business_travel: f64,
    pub employee_commuting: f64,
    pub upstream_leased_assets: f64,
    pub downstream_transport: f64,
    pub processing_of_sold_products: f64,
    pub use_of_sold_products: f64,
    pub end_of_life: f64,
    pub downstream_leased_assets: f64,
    pub franchises: f64,
    pub investments: f64,
}

impl Scope3 {
    fn values(&self) -> [f64; 15] {
        [
            self.purchased_goods,
            self.capital_goods,
            self.fuel_and_energy,
            self.upstream_transport,
            self.waste,
            self.business_travel,
            self.employee_commuting,
            self.upstream_leased_assets,
            self.downstream_transport,
            self.processing_of_sold_products,
            self.use_of_sold_products,
            self.end_of_life,
            self.downstream_leased_assets,
            self.franchises,
            self.investments,
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Emissions {
    pub scope1: Scope1,
    pub scope2: Scope2,
    pub scope3: Scope3,
}

impl Emissions {
    fn validate(&self) -> Result<(), DomainError> {
        let all = self
            .scope1
            .values()
            .into_iter()
            .chain(self.scope2.values())
            .chain(self.scope3.values());
        for v in all {
            if !(v >= 0.0) || !v.is_finite() {
                return Err(invalid("emission values must be finite and non-negative"));
            }
        }
        Ok(())
    }
}

/// Operational data used for intensities and for recalculating emissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ActivityData {
    pub employees: Option<f64>,
    pub revenue_usd: Option<f64>,
    pub production_units: Option<f64>,
    pub floor_area_m2: Option<f64>,
    pub electricity_mwh: Option<f64>,
    pub natural_gas: Option<f64>,
    pub diesel: Option<f64>,
    pub gasoline: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub scope1: f64,
    pub scope2: f64,
    pub scope3: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intensities {
    pub per_employee: Option<f64>,
    pub per_million_revenue: Option<f64>,
    pub per_unit: Option<f64>,
    pub per_m2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationTarget {
    pub percentage: f64,
    pub required_t: f64,
    pub tokens_needed: f64,
    pub estimated_budget_cents: i64,
}

pub fn totals(emissions: &Emissions) -> Totals {
    let scope1 = round6(emissions.scope1.total());
    let scope2 = round6(emissions.scope2.total());
    let scope3 = round6(emissions.scope3.total());
    Totals {
        scope1,
        scope2,
        scope3,
        total: round6(scope1 + scope2 + scope3),
    }
}

pub fn intensities(total: f64, activity: &ActivityData) -> Intensities {
    let per = |denominator: Option<f64>, scale: f64| {
        denominator
            .filter(|d| *d > 0.0)
            .map(|d| round6(total * scale / d))
    };
    Intensities {
        per_employee: per(activity.employees, 1.0),
        per_million_revenue: per(activity.revenue_usd, 1_000_000.0),
        per_unit: per(activity.production_units, 1.0),
        per_m2: per(activity.floor_area_m2, 1.0),
    }
}

pub fn compensation_target(total: f64, percentage: f64, token_price_cents: i64) -> CompensationTarget {
    let required_t = round6(total * percentage / 100.0);
    CompensationTarget {
        percentage,
        required_t,
        tokens_needed: required_t,
        estimated_budget_cents: (required_t * token_price_cents as f64).round() as i64,
    }
}

/// Overwrites the activity-driven emission lines with values computed from
/// the recorded fuel and electricity consumption. Lines whose activity value
/// is missing keep what was reported.
pub fn apply_emission_factors(emissions: &mut Emissions, activity: &ActivityData) {
    if let Some(mwh) = activity.electricity_mwh {
        emissions.scope2.electricity = round6(mwh * ELECTRICITY_FACTOR);
    }
    if activity.diesel.is_some() || activity.gasoline.is_some() {
        emissions.scope1.mobile_combustion = round6(
            activity.diesel.unwrap_or(0.0) * DIESEL_FACTOR + activity.gasoline.unwrap_or(0.0) * GASOLINE_FACTOR,
        );
    }
    if let Some(gas) = activity.natural_gas {
        emissions.scope1.stationary_combustion = round6(gas * NATURAL_GAS_FACTOR);
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FootprintInput {
    pub year: i32,
    pub period: ReportingPeriod,
    #[schema(value_type = String, format = Date)]
    pub starts_on: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub ends_on: NaiveDate,
    #[serde(default)]
    pub emissions: Emissions,
    #[serde(default)]
    pub activity: ActivityData,
    #[serde(default)]
    pub compensation_pct: Option<f64>,
    #[serde(default)]
    pub methodology: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FootprintUpdate {
    pub emissions: Option<Emissions>,
    pub activity: Option<ActivityData>,
    pub compensation_pct: Option<f64>,
    pub methodology: Option<String>,
}

fn check_percentage(pct: f64) -> Result<(), DomainError> {
    if !(0.0..=100.0).contains(&pct) {
        return Err(invalid("compensation percentage must be between 0 and 100"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonFootprint {
    pub id: Uuid,
    pub company_id: Uuid,
    pub year: i32,
    pub period: ReportingPeriod,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub emissions: Emissions,
    pub activity: ActivityData,
    pub totals: Totals,
    pub intensities: Intensities,
    pub compensation: CompensationTarget,
    pub methodology: Option<String>,
    pub status: FootprintStatus,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CarbonFootprint {
    pub fn create(
        company_id: Uuid,
        input: FootprintInput,
        token_price_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&input.year) {
            return Err(invalid(format!("year must be between {} and {}", MIN_YEAR, MAX_YEAR)));
        }
        if input.ends_on < input.starts_on {
            return Err(invalid("ends_on cannot be before starts_on"));
        }
        input.emissions.validate()?;
        let pct = input.compensation_pct.unwrap_or(100.0);
        check_percentage(pct)?;
        let mut footprint = Self {
            id: Uuid::new_v4(),
            company_id,
            year: input.year,
            period: input.period,
            starts_on: input.starts_on,
            ends_on: input.ends_on,
            emissions: input.emissions,
            activity: input.activity,
            totals: Totals::default(),
            intensities: Intensities::default(),
            compensation: compensation_target(0.0, pct, token_price_cents),
            methodology: input.methodology,
            status: FootprintStatus::Draft,
            verified_by: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        footprint.recompute(token_price_cents);
        Ok(footprint)
    }

    /// Re-derives totals, intensities and the compensation target.
    pub fn recompute(&mut self, token_price_cents: i64) {
        self.totals = totals(&self.emissions);
        self.intensities = intensities(self.totals.total, &self.activity);
        self.compensation = compensation_target(self.totals.total, self.compensation.percentage, token_price_cents);
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.status.is_editable() {
            return Err(invalid(format!("a footprint in '{}' can no longer be edited", self.status)));
        }
        Ok(())
    }

    pub fn update(&mut self, update: FootprintUpdate, token_price_cents: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_editable()?;
        if let Some(emissions) = &update.emissions {
            emissions.validate()?;
        }
        if let Some(pct) = update.compensation_pct {
            check_percentage(pct)?;
            self.compensation.percentage = pct;
        }
        if let Some(emissions) = update.emissions {
            self.emissions = emissions;
        }
        if let Some(activity) = update.activity {
            self.activity = activity;
        }
        if update.methodology.is_some() {
            self.methodology = update.methodology;
        }
        self.recompute(token_price_cents);
        self.updated_at = now;
        Ok(())
    }

    pub fn recalculate(&mut self, token_price_cents: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_editable()?;
        apply_emission_factors(&mut self.emissions, &self.activity);
        self.recompute(token_price_cents);
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, allowed_from: &[FootprintStatus], next: FootprintStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !allowed_from.contains(&self.status) {
            return Err(DomainError::Transition {
                entity: "footprint",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(&[FootprintStatus::Draft, FootprintStatus::Review], FootprintStatus::Validation, now)
    }

    pub fn verify(&mut self, verifier: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(&[FootprintStatus::Validation], FootprintStatus::Approved, now)?;
        self.verified_by = Some(verifier);
        self.verified_at = Some(now);
        Ok(())
    }

    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(&[FootprintStatus::Approved], FootprintStatus::Published, now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeChange {
    pub previous: f64,
    pub current: f64,
    pub change: f64,
    pub change_pct: Option<f64>,
}

impl ScopeChange {
    fn between(previous: f64, current: f64) -> Self {
        Self {
            previous,
            current,
            change: round6(current - previous),
            change_pct: (previous > 0.0).then(|| round6((current - previous) / previous * 100.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootprintComparison {
    pub year: i32,
    pub previous_year: i32,
    pub scope1: ScopeChange,
    pub scope2: ScopeChange,
    pub scope3: ScopeChange,
    pub total: ScopeChange,
}

pub fn compare(previous: &CarbonFootprint, current: &CarbonFootprint) -> FootprintComparison {
    FootprintComparison {
        year: current.year,
        previous_year: previous.year,
        scope1: ScopeChange::between(previous.totals.scope1, current.totals.scope1),
        scope2: ScopeChange::between(previous.totals.scope2, current.totals.scope2),
        scope3: ScopeChange::between(previous.totals.scope3, current.totals.scope3),
        total: ScopeChange::between(previous.totals.total, current.totals.total),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn input(year: i32) -> FootprintInput {
        FootprintInput {
            year,
            period: ReportingPeriod::Annual,
            starts_on: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            emissions: Emissions {
                scope1: Scope1 {
                    stationary_combustion: 10.0,
                    mobile_combustion: 5.0,
                    ..Default::default()
                },
                scope2: Scope2 {
                    electricity: 20.0,
                    ..Default::default()
                },
                scope3: Scope3 {
                    business_travel: 15.0,
                    ..Default::default()
                },
            },
            activity: ActivityData {
                employees: Some(50.0),
                revenue_usd: Some(2_000_000.0),
                ..Default::default()
            },
            compensation_pct: None,
            methodology: Some("GHG Protocol".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::input;
    use super::*;

    const PRICE: i64 = 1_000;

    #[test]
    fn totals_intensities_and_target_are_derived() {
        let f = CarbonFootprint::create(Uuid::new_v4(), input(2024), PRICE, Utc::now()).unwrap();
        assert_eq!(f.totals.scope1, 15.0);
        assert_eq!(f.totals.scope2, 20.0);
        assert_eq!(f.totals.scope3, 15.0);
        assert_eq!(f.totals.total, 50.0);
        assert_eq!(f.intensities.per_employee, Some(1.0));
        assert_eq!(f.intensities.per_million_revenue, Some(25.0));
        assert_eq!(f.intensities.per_m2, None);
        assert_eq!(f.compensation.required_t, 50.0);
        assert_eq!(f.compensation.tokens_needed, 50.0);
        assert_eq!(f.compensation.estimated_budget_cents, 50_000);
    }

    #[test]
    fn partial_compensation_percentage() {
        let mut i = input(2024);
        i.compensation_pct = Some(40.0);
        let f = CarbonFootprint::create(Uuid::new_v4(), i, PRICE, Utc::now()).unwrap();
        assert_eq!(f.compensation.required_t, 20.0);
    }

    #[test]
    fn rejects_out_of_range_input() {
        assert!(CarbonFootprint::create(Uuid::new_v4(), input(2019), PRICE, Utc::now()).is_err());
        let mut neg = input(2024);
        neg.emissions.scope3.waste = -1.0;
        assert!(CarbonFootprint::create(Uuid::new_v4(), neg, PRICE, Utc::now()).is_err());
        let mut pct = input(2024);
        pct.compensation_pct = Some(150.0);
        assert!(CarbonFootprint::create(Uuid::new_v4(), pct, PRICE, Utc::now()).is_err());
    }

    #[test]
    fn recalculation_applies_emission_factors() {
        let mut i = input(2024);
        i.activity.electricity_mwh = Some(100.0);
        i.activity.diesel = Some(10.0);
        i.activity.gasoline = Some(10.0);
        i.activity.natural_gas = Some(1.0);
        let mut f = CarbonFootprint::create(Uuid::new_v4(), i, PRICE, Utc::now()).unwrap();
        f.recalculate(PRICE, Utc::now()).unwrap();
        assert_eq!(f.emissions.scope2.electricity, 50.0);
        assert_eq!(f.emissions.scope1.mobile_combustion, 49.9);
        assert_eq!(f.emissions.scope1.stationary_combustion, 2.03);
        assert_eq!(f.totals.total, round6(2.03 + 49.9 + 50.0 + 15.0));
    }

    #[test]
    fn lifecycle_locks_edits_after_submission() {
        let mut f = CarbonFootprint::create(Uuid::new_v4(), input(2024), PRICE, Utc::now()).unwrap();
        assert!(f.verify(Uuid::new_v4(), Utc::now()).is_err());
        f.submit(Utc::now()).unwrap();
        assert!(f.update(FootprintUpdate::default(), PRICE, Utc::now()).is_err());
        assert!(f.publish(Utc::now()).is_err());
        f.verify(Uuid::new_v4(), Utc::now()).unwrap();
        f.publish(Utc::now()).unwrap();
        assert_eq!(f.status, FootprintStatus::Published);
        assert!(f.verified_at.is_some());
    }

    #[test]
    fn comparison_with_previous_year() {
        let previous = CarbonFootprint::create(Uuid::new_v4(), input(2023), PRICE, Utc::now()).unwrap();
        let mut current = CarbonFootprint::create(Uuid::new_v4(), input(2024), PRICE, Utc::now()).unwrap();
        current
            .update(
                FootprintUpdate {
                    emissions: Some(Emissions {
                        scope2: Scope2 {
                            electricity: 10.0,
                            ..Default::default()
                        },
                        ..previous.emissions.clone()
                    }),
                    ..Default::default()
                },
                PRICE,
                Utc::now(),
            )
            .unwrap();
        let cmp = compare(&previous, &current);
        assert_eq!(cmp.scope2.change, -10.0);
        assert_eq!(cmp.scope2.change_pct, Some(-50.0));
        assert_eq!(cmp.total.change, -10.0);
        assert_eq!(cmp.total.change_pct, Some(-20.0));
    }
}

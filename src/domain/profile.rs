//! Role-specific profiles. Every user owns exactly one, chosen by role.

use crate::domain::user::Role;
use crate::domain::{invalid, round6, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub municipality: String,
    pub department: String,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Location {
    fn validate(&self, require_address: bool) -> Result<(), DomainError> {
        require_text("location.municipality", &self.municipality)?;
        require_text("location.department", &self.department)?;
        if require_address {
            require_text("location.address", self.address.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }

    /// Case-insensitive match of `needle` against municipality or department.
    pub fn matches_region(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.municipality.to_lowercase().contains(&needle)
            || self.department.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank: String,
    pub account_type: String,
    pub account_number: String,
}

fn require_text(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Farmer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmerStats {
    pub total_productions: i64,
    pub total_tonnes: f64,
    pub total_tokens: f64,
    pub total_income_cents: i64,
}

impl FarmerStats {
    pub fn add(&mut self, delta: &FarmerStats) {
        self.total_productions += delta.total_productions;
        self.total_tonnes = round6(self.total_tonnes + delta.total_tonnes);
        self.total_tokens = round6(self.total_tokens + delta.total_tokens);
        self.total_income_cents += delta.total_income_cents;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farmer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub mill_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub phone: Option<String>,
    pub farm_name: String,
    pub location: Location,
    pub total_hectares: f64,
    pub cane_hectares: f64,
    pub bank_account: Option<BankAccount>,
    pub mill_internal_code: Option<String>,
    pub status: ProfileStatus,
    pub stats: FarmerStats,
    pub created_at: DateTime<Utc>,
}

impl Farmer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FarmerInput {
    pub mill_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub farm_name: String,
    pub location: Location,
    pub total_hectares: f64,
    pub cane_hectares: f64,
    #[serde(default)]
    pub bank_account: Option<BankAccount>,
    #[serde(default)]
    pub mill_internal_code: Option<String>,
}

fn check_hectares(total: f64, cane: f64) -> Result<(), DomainError> {
    if !(total >= 0.1) {
        return Err(invalid("total_hectares must be at least 0.1"));
    }
    if !(cane >= 0.1) {
        return Err(invalid("cane_hectares must be at least 0.1"));
    }
    if cane > total {
        return Err(invalid("cane_hectares cannot exceed total_hectares"));
    }
    Ok(())
}

impl FarmerInput {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_text("first_name", &self.first_name)?;
        require_text("last_name", &self.last_name)?;
        require_text("national_id", &self.national_id)?;
        require_text("farm_name", &self.farm_name)?;
        self.location.validate(false)?;
        check_hectares(self.total_hectares, self.cane_hectares)
    }

    fn build(self, user_id: Uuid, now: DateTime<Utc>) -> Farmer {
        Farmer {
            id: Uuid::new_v4(),
            user_id,
            mill_id: self.mill_id,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            national_id: self.national_id.trim().to_string(),
            phone: self.phone,
            farm_name: self.farm_name.trim().to_string(),
            location: self.location,
            total_hectares: self.total_hectares,
            cane_hectares: self.cane_hectares,
            bank_account: self.bank_account,
            mill_internal_code: self.mill_internal_code,
            status: ProfileStatus::Active,
            stats: FarmerStats::default(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Mill
// ---------------------------------------------------------------------------

/// Bounds a mill applies to the deliveries it reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportLimits {
    pub min_tonnes: f64,
    pub max_tonnes: f64,
    pub max_humidity: f64,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            min_tonnes: 0.1,
            max_tonnes: 1000.0,
            max_humidity: 15.0,
        }
    }
}

impl ReportLimits {
    fn validate(&self) -> Result<(), DomainError> {
        if !(self.min_tonnes > 0.0 && self.max_tonnes >= self.min_tonnes) {
            return Err(invalid("report_limits: expected 0 < min_tonnes <= max_tonnes"));
        }
        if !(0.0..=100.0).contains(&self.max_humidity) {
            return Err(invalid("report_limits.max_humidity must be between 0 and 100"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MillStats {
    pub total_productions: i64,
    pub total_tonnes: f64,
    pub total_tokens: f64,
    pub commission_cents: i64,
}

impl MillStats {
    pub fn add(&mut self, delta: &MillStats) {
        self.total_productions += delta.total_productions;
        self.total_tonnes = round6(self.total_tonnes + delta.total_tonnes);
        self.total_tokens = round6(self.total_tokens + delta.total_tokens);
        self.commission_cents += delta.commission_cents;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mill {
    pub id: Uuid,
    pub user_id: Uuid,
    pub legal_name: String,
    pub tax_id: String,
    pub trade_name: String,
    pub phone: Option<String>,
    pub location: Location,
    pub daily_capacity_t: f64,
    pub annual_capacity_t: f64,
    pub environmental_license: Option<String>,
    pub report_limits: ReportLimits,
    pub status: ProfileStatus,
    pub stats: MillStats,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MillInput {
    pub legal_name: String,
    pub tax_id: String,
    pub trade_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub location: Location,
    pub daily_capacity_t: f64,
    pub annual_capacity_t: f64,
    #[serde(default)]
    pub environmental_license: Option<String>,
    #[serde(default)]
    pub report_limits: Option<ReportLimits>,
}

impl MillInput {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_text("legal_name", &self.legal_name)?;
        require_text("tax_id", &self.tax_id)?;
        require_text("trade_name", &self.trade_name)?;
        self.location.validate(true)?;
        if !(self.daily_capacity_t >= 1.0) || !(self.annual_capacity_t >= 1.0) {
            return Err(invalid("daily and annual capacity must be at least 1 tonne"));
        }
        if let Some(limits) = &self.report_limits {
            limits.validate()?;
        }
        Ok(())
    }

    fn build(self, user_id: Uuid, now: DateTime<Utc>) -> Mill {
        Mill {
            id: Uuid::new_v4(),
            user_id,
            legal_name: self.legal_name.trim().to_string(),
            tax_id: self.tax_id.trim().to_string(),
            trade_name: self.trade_name.trim().to_string(),
            phone: self.phone,
            location: self.location,
            daily_capacity_t: self.daily_capacity_t,
            annual_capacity_t: self.annual_capacity_t,
            environmental_license: self.environmental_license,
            report_limits: self.report_limits.unwrap_or_default(),
            status: ProfileStatus::Active,
            stats: MillStats::default(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Company
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Manufacturing,
    Services,
    Technology,
    Construction,
    Transport,
    Energy,
    Mining,
    Agriculture,
    Commerce,
    Financial,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySize {
    Micro,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyLocation {
    pub country: String,
    pub city: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SustainabilityGoals {
    #[serde(default)]
    pub net_zero_year: Option<i32>,
    #[serde(default)]
    pub reduction_target_pct: Option<f64>,
    #[serde(default)]
    pub scope1_t: Option<f64>,
    #[serde(default)]
    pub scope2_t: Option<f64>,
    #[serde(default)]
    pub scope3_t: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchasePreferences {
    #[serde(default)]
    pub max_price_per_token_cents: Option<i64>,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: f64,
    #[serde(default)]
    pub max_quantity: Option<f64>,
}

fn default_min_quantity() -> f64 {
    1.0
}

impl Default for PurchasePreferences {
    fn default() -> Self {
        Self {
            max_price_per_token_cents: None,
            min_quantity: default_min_quantity(),
            max_quantity: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyStats {
    pub tokens_purchased: f64,
    pub co2_compensated_t: f64,
    pub total_spent_cents: i64,
    pub transaction_count: i64,
}

impl CompanyStats {
    pub fn add(&mut self, delta: &CompanyStats) {
        self.tokens_purchased = round6(self.tokens_purchased + delta.tokens_purchased);
        self.co2_compensated_t = round6(self.co2_compensated_t + delta.co2_compensated_t);
        self.total_spent_cents += delta.total_spent_cents;
        self.transaction_count += delta.transaction_count;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub user_id: Uuid,
    pub legal_name: String,
    pub tax_id: String,
    pub sector: Sector,
    pub size: CompanySize,
    pub phone: Option<String>,
    pub location: CompanyLocation,
    pub sustainability: SustainabilityGoals,
    pub annual_footprint_t: f64,
    pub carbon_budget_cents: Option<i64>,
    pub purchase_preferences: PurchasePreferences,
    pub status: ProfileStatus,
    pub verified: bool,
    pub stats: CompanyStats,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn remaining_budget_cents(&self) -> Option<i64> {
        self.carbon_budget_cents
            .map(|budget| budget - self.stats.total_spent_cents)
    }

    /// Checks a prospective purchase against the company's own rules:
    /// remaining budget first, then the highest unit price it accepts, then
    /// the quantity bounds.
    pub fn check_purchase(
        &self,
        quantity: f64,
        cost_cents: i64,
        max_unit_price_cents: i64,
    ) -> Result<(), DomainError> {
        if let Some(remaining) = self.remaining_budget_cents() {
            if cost_cents > remaining {
                return Err(invalid(format!(
                    "purchase of {} cents exceeds the remaining carbon budget of {} cents",
                    cost_cents, remaining
                )));
            }
        }
        let prefs = &self.purchase_preferences;
        if let Some(max_price) = prefs.max_price_per_token_cents {
            if max_unit_price_cents > max_price {
                return Err(invalid(format!(
                    "token price {} cents is above the company's maximum of {} cents",
                    max_unit_price_cents, max_price
                )));
            }
        }
        if quantity < prefs.min_quantity {
            return Err(invalid(format!(
                "quantity {} is below the company's minimum of {}",
                quantity, prefs.min_quantity
            )));
        }
        if let Some(max_qty) = prefs.max_quantity {
            if quantity > max_qty {
                return Err(invalid(format!(
                    "quantity {} is above the company's maximum of {}",
                    quantity, max_qty
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyInput {
    pub legal_name: String,
    pub tax_id: String,
    pub sector: Sector,
    pub size: CompanySize,
    #[serde(default)]
    pub phone: Option<String>,
    pub location: CompanyLocation,
    #[serde(default)]
    pub sustainability: SustainabilityGoals,
    #[serde(default)]
    pub annual_footprint_t: f64,
    #[serde(default)]
    pub carbon_budget_cents: Option<i64>,
    #[serde(default)]
    pub purchase_preferences: PurchasePreferences,
}

fn check_preferences(prefs: &PurchasePreferences) -> Result<(), DomainError> {
    if !(prefs.min_quantity >= 0.0) {
        return Err(invalid("purchase_preferences.min_quantity cannot be negative"));
    }
    if let Some(max) = prefs.max_quantity {
        if max < prefs.min_quantity {
            return Err(invalid("purchase_preferences.max_quantity is below min_quantity"));
        }
    }
    if matches!(prefs.max_price_per_token_cents, Some(p) if p <= 0) {
        return Err(invalid("purchase_preferences.max_price_per_token_cents must be positive"));
    }
    Ok(())
}

impl CompanyInput {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_text("legal_name", &self.legal_name)?;
        require_text("tax_id", &self.tax_id)?;
        require_text("location.country", &self.location.country)?;
        require_text("location.city", &self.location.city)?;
        require_text("location.address", &self.location.address)?;
        if self.annual_footprint_t < 0.0 {
            return Err(invalid("annual_footprint_t cannot be negative"));
        }
        if matches!(self.carbon_budget_cents, Some(b) if b < 0) {
            return Err(invalid("carbon_budget_cents cannot be negative"));
        }
        check_preferences(&self.purchase_preferences)
    }

    fn build(self, user_id: Uuid, now: DateTime<Utc>) -> Company {
        Company {
            id: Uuid::new_v4(),
            user_id,
            legal_name: self.legal_name.trim().to_string(),
            tax_id: self.tax_id.trim().to_string(),
            sector: self.sector,
            size: self.size,
            phone: self.phone,
            location: self.location,
            sustainability: self.sustainability,
            annual_footprint_t: self.annual_footprint_t,
            carbon_budget_cents: self.carbon_budget_cents,
            purchase_preferences: self.purchase_preferences,
            status: ProfileStatus::Active,
            verified: false,
            stats: CompanyStats::default(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Profile sum type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", content = "details", rename_all = "snake_case")]
pub enum Profile {
    Farmer(Farmer),
    Mill(Mill),
    Company(Company),
    Admin,
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Farmer(_) => Role::Farmer,
            Profile::Mill(_) => Role::Mill,
            Profile::Company(_) => Role::Company,
            Profile::Admin => Role::Admin,
        }
    }

    /// Profile record id; admins have no profile row.
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Profile::Farmer(f) => Some(f.id),
            Profile::Mill(m) => Some(m.id),
            Profile::Company(c) => Some(c.id),
            Profile::Admin => None,
        }
    }
}

/// Registration payload for the role-specific part of an account.
#[derive(Debug, Clone)]
pub enum ProfileInput {
    Farmer(FarmerInput),
    Mill(MillInput),
    Company(CompanyInput),
}

impl ProfileInput {
    pub fn from_json(role: Role, value: JsonValue) -> Result<Self, DomainError> {
        fn parse<T: serde::de::DeserializeOwned>(role: Role, value: JsonValue) -> Result<T, DomainError> {
            serde_json::from_value(value)
                .map_err(|e| invalid(format!("invalid {} profile: {}", role, e)))
        }
        let input = match role {
            Role::Farmer => ProfileInput::Farmer(parse(role, value)?),
            Role::Mill => ProfileInput::Mill(parse(role, value)?),
            Role::Company => ProfileInput::Company(parse(role, value)?),
            Role::Admin => return Err(invalid("admin accounts have no registrable profile")),
        };
        input.validate()?;
        Ok(input)
    }

    fn validate(&self) -> Result<(), DomainError> {
        match self {
            ProfileInput::Farmer(f) => f.validate(),
            ProfileInput::Mill(m) => m.validate(),
            ProfileInput::Company(c) => c.validate(),
        }
    }

    pub fn into_profile(self, user_id: Uuid, now: DateTime<Utc>) -> Profile {
        match self {
            ProfileInput::Farmer(f) => Profile::Farmer(f.build(user_id, now)),
            ProfileInput::Mill(m) => Profile::Mill(m.build(user_id, now)),
            ProfileInput::Company(c) => Profile::Company(c.build(user_id, now)),
        }
    }
}

// ---------------------------------------------------------------------------
// Self-service updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FarmerUpdate {
    pub phone: Option<String>,
    pub farm_name: Option<String>,
    pub location: Option<Location>,
    pub total_hectares: Option<f64>,
    pub cane_hectares: Option<f64>,
    pub bank_account: Option<BankAccount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MillUpdate {
    pub phone: Option<String>,
    pub trade_name: Option<String>,
    pub location: Option<Location>,
    pub environmental_license: Option<String>,
    pub report_limits: Option<ReportLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyUpdate {
    pub phone: Option<String>,
    pub location: Option<CompanyLocation>,
    pub sustainability: Option<SustainabilityGoals>,
    pub annual_footprint_t: Option<f64>,
    pub carbon_budget_cents: Option<i64>,
    pub purchase_preferences: Option<PurchasePreferences>,
}

impl Profile {
    /// Applies an update document to the profile. Fields that do not belong
    /// to the profile's role are rejected.
    pub fn apply_update(&mut self, value: JsonValue) -> Result<(), DomainError> {
        fn parse<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T, DomainError> {
            serde_json::from_value(value).map_err(|e| invalid(format!("invalid profile update: {}", e)))
        }
        match self {
            Profile::Farmer(f) => {
                let u: FarmerUpdate = parse(value)?;
                let total = u.total_hectares.unwrap_or(f.total_hectares);
                let cane = u.cane_hectares.unwrap_or(f.cane_hectares);
                check_hectares(total, cane)?;
                if let Some(location) = &u.location {
                    location.validate(false)?;
                }
                if let Some(name) = &u.farm_name {
                    require_text("farm_name", name)?;
                    f.farm_name = name.trim().to_string();
                }
                f.total_hectares = total;
                f.cane_hectares = cane;
                f.phone = u.phone.or(f.phone.take());
                f.location = u.location.unwrap_or_else(|| f.location.clone());
                f.bank_account = u.bank_account.or(f.bank_account.take());
            }
            Profile::Mill(m) => {
                let u: MillUpdate = parse(value)?;
                if let Some(location) = &u.location {
                    location.validate(true)?;
                }
                if let Some(limits) = &u.report_limits {
                    limits.validate()?;
                    m.report_limits = *limits;
                }
                if let Some(name) = &u.trade_name {
                    require_text("trade_name", name)?;
                    m.trade_name = name.trim().to_string();
                }
                m.phone = u.phone.or(m.phone.take());
                m.location = u.location.unwrap_or_else(|| m.location.clone());
                m.environmental_license = u.environmental_license.or(m.environmental_license.take());
            }
            Profile::Company(c) => {
                let u: CompanyUpdate = parse(value)?;
                if let Some(prefs) = &u.purchase_preferences {
                    check_preferences(prefs)?;
                }
                if matches!(u.annual_footprint_t, Some(v) if v < 0.0) {
                    return Err(invalid("annual_footprint_t cannot be negative"));
                }
                if matches!(u.carbon_budget_cents, Some(b) if b < 0) {
                    return Err(invalid("carbon_budget_cents cannot be negative"));
                }
                c.phone = u.phone.or(c.phone.take());
                if let Some(location) = u.location {
                    c.location = location;
                }
                if let Some(goals) = u.sustainability {
                    c.sustainability = goals;
                }
                if let Some(footprint) = u.annual_footprint_t {
                    c.annual_footprint_t = footprint;
                }
                if u.carbon_budget_cents.is_some() {
                    c.carbon_budget_cents = u.carbon_budget_cents;
                }
                if let Some(prefs) = u.purchase_preferences {
                    c.purchase_preferences = prefs;
                }
            }
            Profile::Admin => return Err(invalid("admin accounts have no editable profile")),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn farmer_json(mill_id: Uuid, national_id: &str) -> JsonValue {
        json!({
            "mill_id": mill_id,
            "first_name": "Rosa",
            "last_name": "Quintero",
            "national_id": national_id,
            "farm_name": "La Esperanza",
            "location": { "municipality": "Palmira", "department": "Valle del Cauca" },
            "total_hectares": 12.5,
            "cane_hectares": 10.0
        })
    }

    pub fn mill_json(tax_id: &str) -> JsonValue {
        json!({
            "legal_name": "Ingenio del Valle S.A.",
            "tax_id": tax_id,
            "trade_name": "Ingenio del Valle",
            "location": {
                "municipality": "Palmira",
                "department": "Valle del Cauca",
                "address": "Km 4 via Candelaria"
            },
            "daily_capacity_t": 8000.0,
            "annual_capacity_t": 2000000.0
        })
    }

    pub fn company_json(tax_id: &str) -> JsonValue {
        json!({
            "legal_name": "Textiles Andinos S.A.S.",
            "tax_id": tax_id,
            "sector": "manufacturing",
            "size": "medium",
            "location": { "country": "Colombia", "city": "Cali", "address": "Cra 1 # 2-3" }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    fn company(budget: Option<i64>, spent: i64, prefs: PurchasePreferences) -> Company {
        let mut c = match ProfileInput::from_json(Role::Company, company_json("900123")).unwrap() {
            ProfileInput::Company(c) => c.build(Uuid::new_v4(), Utc::now()),
            _ => unreachable!(),
        };
        c.carbon_budget_cents = budget;
        c.stats.total_spent_cents = spent;
        c.purchase_preferences = prefs;
        c
    }

    #[test]
    fn profile_input_is_parsed_per_role() {
        let input = ProfileInput::from_json(Role::Farmer, farmer_json(Uuid::new_v4(), "1001")).unwrap();
        let profile = input.into_profile(Uuid::new_v4(), Utc::now());
        assert_eq!(profile.role(), Role::Farmer);
        assert!(profile.id().is_some());

        // mill payload offered for a farmer account
        assert!(ProfileInput::from_json(Role::Farmer, mill_json("800")).is_err());
        assert!(ProfileInput::from_json(Role::Admin, json!({})).is_err());
    }

    #[test]
    fn cane_hectares_cannot_exceed_total() {
        let mut v = farmer_json(Uuid::new_v4(), "1002");
        v["cane_hectares"] = json!(20.0);
        let err = ProfileInput::from_json(Role::Farmer, v).unwrap_err();
        assert!(err.to_string().contains("cane_hectares"));
    }

    #[test]
    fn mill_requires_address() {
        let mut v = mill_json("800");
        v["location"]["address"] = json!("  ");
        assert!(ProfileInput::from_json(Role::Mill, v).is_err());
    }

    #[test]
    fn purchase_checks_budget_before_price_and_quantity() {
        let prefs = PurchasePreferences {
            max_price_per_token_cents: Some(1_500),
            min_quantity: 1.0,
            max_quantity: Some(100.0),
        };
        let c = company(Some(10_000), 4_000, prefs);
        assert_eq!(c.remaining_budget_cents(), Some(6_000));

        let over_budget = c.check_purchase(0.5, 7_000, 2_000).unwrap_err();
        assert!(over_budget.to_string().contains("budget"));
        assert!(c.check_purchase(5.0, 5_000, 2_000).unwrap_err().to_string().contains("price"));
        assert!(c.check_purchase(0.5, 500, 1_000).unwrap_err().to_string().contains("minimum"));
        assert!(c.check_purchase(150.0, 5_000, 1_000).unwrap_err().to_string().contains("maximum"));
        assert!(c.check_purchase(5.0, 5_000, 1_000).is_ok());
    }

    #[test]
    fn no_budget_means_unbounded_spend() {
        let c = company(None, 1_000_000, PurchasePreferences::default());
        assert!(c.check_purchase(1.0, 99_999_999, 1_000).is_ok());
    }

    #[test]
    fn updates_reject_fields_of_other_roles() {
        let mut profile = ProfileInput::from_json(Role::Mill, mill_json("801"))
            .unwrap()
            .into_profile(Uuid::new_v4(), Utc::now());
        assert!(profile.apply_update(json!({ "farm_name": "x" })).is_err());
        profile
            .apply_update(json!({ "report_limits": { "min_tonnes": 1.0, "max_tonnes": 50.0, "max_humidity": 20.0 } }))
            .unwrap();
        match profile {
            Profile::Mill(m) => assert_eq!(m.report_limits.max_tonnes, 50.0),
            _ => unreachable!(),
        }
    }
}

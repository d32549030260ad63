//! Read-only aggregates for the dashboards.

use super::{Actor, Marketplace};
use crate::domain::footprint::CarbonFootprint;
use crate::domain::production::{Production, ProductionStats, ProductionStatus};
use crate::domain::profile::{CompanyStats, FarmerStats, MillStats, Profile};
use crate::domain::token::{Token, TokenStats, TokenStatus};
use crate::domain::transaction::{Currency, TransactionStatus};
use crate::domain::user::Role;
use crate::domain::round6;
use crate::error::AppResult;
use crate::storage::{FootprintFilter, ProductionFilter, TokenFilter, TokenOrder, TransactionFilter};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

const RECENT: usize = 5;
const TOP: usize = 5;
const ACTIVITY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub listed: u64,
    pub sold: u64,
    pub retired: u64,
    pub tokenized_co2: f64,
    pub sold_value_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub confirmed: u64,
    pub failed: u64,
    /// tCANE moved by confirmed mint, transfer, purchase and burn records.
    pub volume_tcane: f64,
    pub payouts_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub days: i64,
    pub productions: u64,
    pub tokens_minted: u64,
    pub transactions: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmerRank {
    pub farmer_id: Uuid,
    pub name: String,
    pub total_tonnes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyRank {
    pub company_id: Uuid,
    pub legal_name: String,
    pub total_spent_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralDashboard {
    pub active_users: BTreeMap<&'static str, u64>,
    pub productions: ProductionStats,
    pub tokens: TokenSummary,
    pub transactions: TransactionSummary,
    pub recent: RecentActivity,
    pub top_farmers: Vec<FarmerRank>,
    pub top_companies: Vec<CompanyRank>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleDashboard {
    Farmer {
        stats: FarmerStats,
        productions: BTreeMap<ProductionStatus, u64>,
        recent_productions: Vec<Production>,
        tokens: TokenStats,
    },
    Mill {
        stats: MillStats,
        productions: BTreeMap<ProductionStatus, u64>,
        recent_productions: Vec<Production>,
        farmers: u64,
        commission_cents: i64,
    },
    Company {
        stats: CompanyStats,
        remaining_budget_cents: Option<i64>,
        footprints: Vec<CarbonFootprint>,
        recent_purchases: Vec<Token>,
    },
    Admin(GeneralDashboard),
}

fn newest_productions(mut records: Vec<Production>) -> Vec<Production> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records.truncate(RECENT);
    records
}

impl Marketplace {
    pub async fn general_dashboard(&self, actor: &Actor) -> AppResult<GeneralDashboard> {
        actor.require_admin()?;
        let since = Utc::now() - Duration::days(ACTIVITY_WINDOW_DAYS);

        let users = self.store.list_users(None).await?;
        let mut active_users: BTreeMap<&'static str, u64> = Role::ALL.iter().map(|r| (r.as_str(), 0)).collect();
        for user in users.iter().filter(|u| u.active) {
            *active_users.entry(user.role.as_str()).or_default() += 1;
        }

        let productions = self.store.all_productions(&ProductionFilter::default()).await?;
        let tokens = self.store.all_tokens(&TokenFilter::default()).await?;
        let transactions = self.store.all_transactions(&TransactionFilter::default()).await?;

        let count = |status: TokenStatus| tokens.iter().filter(|t| t.status == status).count() as u64;
        let token_summary = TokenSummary {
            listed: tokens.iter().filter(|t| t.status.is_listed()).count() as u64,
            sold: count(TokenStatus::Sold),
            retired: count(TokenStatus::Retired),
            tokenized_co2: round6(tokens.iter().map(|t| t.co2_equivalent).sum()),
            sold_value_cents: tokens
                .iter()
                .filter_map(|t| t.sale.as_ref())
                .map(|s| s.value_cents)
                .sum(),
        };

        let confirmed: Vec<_> = transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Confirmed)
            .collect();
        let transaction_summary = TransactionSummary {
            confirmed: confirmed.len() as u64,
            failed: transactions
                .iter()
                .filter(|t| t.status == TransactionStatus::Failed)
                .count() as u64,
            volume_tcane: round6(
                confirmed
                    .iter()
                    .filter(|t| t.currency == Currency::Tcane)
                    .map(|t| t.amount)
                    .sum(),
            ),
            payouts_usd: round6(
                confirmed
                    .iter()
                    .filter(|t| t.currency == Currency::Usd)
                    .map(|t| t.amount)
                    .sum(),
            ),
        };

        let recent = RecentActivity {
            days: ACTIVITY_WINDOW_DAYS,
            productions: productions.iter().filter(|p| p.created_at >= since).count() as u64,
            tokens_minted: tokens
                .iter()
                .filter(|t| t.minted_at.is_some_and(|at| at >= since))
                .count() as u64,
            transactions: transactions.iter().filter(|t| t.created_at >= since).count() as u64,
        };

        let mut farmers = self.store.list_farmers(None).await?;
        farmers.sort_by(|a, b| b.stats.total_tonnes.total_cmp(&a.stats.total_tonnes));
        let top_farmers = farmers
            .into_iter()
            .take(TOP)
            .map(|f| FarmerRank {
                farmer_id: f.id,
                name: f.full_name(),
                total_tonnes: f.stats.total_tonnes,
            })
            .collect();
        let mut companies = self.store.list_companies().await?;
        companies.sort_by(|a, b| b.stats.total_spent_cents.cmp(&a.stats.total_spent_cents));
        let top_companies = companies
            .into_iter()
            .take(TOP)
            .map(|c| CompanyRank {
                company_id: c.id,
                legal_name: c.legal_name,
                total_spent_cents: c.stats.total_spent_cents,
            })
            .collect();

        Ok(GeneralDashboard {
            active_users,
            productions: ProductionStats::from_records(&productions),
            tokens: token_summary,
            transactions: transaction_summary,
            recent,
            top_farmers,
            top_companies,
        })
    }

    /// The dashboard of the caller's own role.
    pub async fn dashboard(&self, actor: &Actor) -> AppResult<RoleDashboard> {
        match &actor.profile {
            Profile::Farmer(farmer) => {
                let filter = ProductionFilter {
                    farmer_id: Some(farmer.id),
                    ..ProductionFilter::default()
                };
                let productions = self.store.all_productions(&filter).await?;
                let tokens = self
                    .store
                    .all_tokens(&TokenFilter {
                        farmer_id: Some(farmer.id),
                        ..TokenFilter::default()
                    })
                    .await?;
                Ok(RoleDashboard::Farmer {
                    stats: farmer.stats.clone(),
                    productions: ProductionStats::from_records(&productions).by_status,
                    recent_productions: newest_productions(productions),
                    tokens: TokenStats::from_records(&tokens),
                })
            }
            Profile::Mill(mill) => {
                let filter = ProductionFilter {
                    mill_id: Some(mill.id),
                    ..ProductionFilter::default()
                };
                let productions = self.store.all_productions(&filter).await?;
                let farmers = self.store.list_farmers(Some(mill.id)).await?.len() as u64;
                Ok(RoleDashboard::Mill {
                    stats: mill.stats.clone(),
                    productions: ProductionStats::from_records(&productions).by_status,
                    recent_productions: newest_productions(productions),
                    farmers,
                    commission_cents: mill.stats.commission_cents,
                })
            }
            Profile::Company(company) => {
                let footprints = self
                    .store
                    .list_footprints(&FootprintFilter {
                        company_id: Some(company.id),
                        ..FootprintFilter::default()
                    })
                    .await?;
                let mut purchases = self
                    .store
                    .all_tokens(&TokenFilter {
                        owner_company_id: Some(company.id),
                        order: TokenOrder::Newest,
                        ..TokenFilter::default()
                    })
                    .await?;
                purchases.sort_by(|a, b| {
                    let sold_at = |t: &Token| t.sale.as_ref().map(|s| s.sold_at);
                    sold_at(b).cmp(&sold_at(a))
                });
                purchases.truncate(RECENT);
                Ok(RoleDashboard::Company {
                    stats: company.stats.clone(),
                    remaining_budget_cents: company.remaining_budget_cents(),
                    footprints,
                    recent_purchases: purchases,
                })
            }
            Profile::Admin => Ok(RoleDashboard::Admin(self.general_dashboard(actor).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::catalog::PurchaseInput;
    use crate::app::testkit::kit;
    use crate::domain::production::fixtures::input;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn general_dashboard_aggregates_the_market() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let rosa = kit.farmer("rosa", &mill, Some('F')).await;
        let luis = kit.farmer("luis", &mill, Some('L')).await;
        let company = kit.company("textil", 'C').await;
        let admin = kit.admin().await;

        let mut minted = Vec::new();
        for (farmer, tonnage) in [(&rosa, 10.0), (&luis, 30.0)] {
            let p = kit
                .market
                .register_production(&mill, input(farmer.profile.id().unwrap(), tonnage))
                .await
                .unwrap();
            kit.market.validate_production(&mill, p.id).await.unwrap();
            minted.push(kit.market.mint_tokens(&mill, p.id).await.unwrap().token);
        }
        kit.market
            .purchase_tokens(
                &company,
                PurchaseInput {
                    token_ids: vec![minted[0].id],
                    wallet: None,
                },
            )
            .await
            .unwrap();

        let general = kit.market.general_dashboard(&admin).await.unwrap();
        assert_eq!(general.active_users["farmer"], 2);
        assert_eq!(general.active_users["admin"], 1);
        assert_eq!(general.productions.count, 2);
        assert_eq!(general.productions.avg_tonnes, 20.0);
        assert_eq!(general.tokens.listed, 1);
        assert_eq!(general.tokens.sold, 1);
        assert_eq!(general.tokens.tokenized_co2, 58.8);
        assert_eq!(general.tokens.sold_value_cents, minted[0].value_cents);
        assert_eq!(general.transactions.confirmed, 3);
        assert_eq!(general.recent.tokens_minted, 2);
        assert_eq!(general.top_farmers[0].farmer_id, luis.profile.id().unwrap());
        assert_eq!(general.top_companies[0].total_spent_cents, minted[0].value_cents);

        let err = kit.market.general_dashboard(&company).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn role_dashboards_follow_the_caller() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        kit.market
            .register_production(&mill, input(farmer.profile.id().unwrap(), 12.0))
            .await
            .unwrap();

        match kit.market.dashboard(&mill).await.unwrap() {
            RoleDashboard::Mill { farmers, productions, .. } => {
                assert_eq!(farmers, 1);
                assert_eq!(productions[&ProductionStatus::Registered], 1);
            }
            other => panic!("unexpected dashboard {:?}", other),
        }
        match kit.market.dashboard(&farmer).await.unwrap() {
            RoleDashboard::Farmer { recent_productions, .. } => assert_eq!(recent_productions.len(), 1),
            other => panic!("unexpected dashboard {:?}", other),
        }
        let company = kit.company("textil", 'C').await;
        match kit.market.dashboard(&company).await.unwrap() {
            RoleDashboard::Company { remaining_budget_cents, footprints, .. } => {
                assert_eq!(remaining_budget_cents, None);
                assert!(footprints.is_empty());
            }
            other => panic!("unexpected dashboard {:?}", other),
        }
    }
}

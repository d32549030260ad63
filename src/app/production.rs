//! Production reporting workflow: register, validate, reject, query.

use super::{Actor, Marketplace};
use crate::domain::production::{Production, ProductionInput, ProductionStats};
use crate::domain::profile::{FarmerStats, MillStats, Profile};
use crate::domain::{PageRequest, Paged};
use crate::error::{AppError, AppResult};
use crate::storage::{ProductionFilter, StatsDelta};
use chrono::Utc;
use uuid::Uuid;

fn scoped(actor: &Actor, mut filter: ProductionFilter) -> AppResult<ProductionFilter> {
    match &actor.profile {
        Profile::Farmer(f) => filter.farmer_id = Some(f.id),
        Profile::Mill(m) => filter.mill_id = Some(m.id),
        Profile::Admin => {}
        Profile::Company(_) => return Err(AppError::forbidden("companies have no access to production records")),
    }
    Ok(filter)
}

fn can_view(actor: &Actor, production: &Production) -> bool {
    match &actor.profile {
        Profile::Farmer(f) => production.farmer_id == f.id,
        Profile::Mill(m) => production.mill_id == m.id,
        Profile::Admin => true,
        Profile::Company(_) => false,
    }
}

impl Marketplace {
    pub async fn register_production(&self, actor: &Actor, input: ProductionInput) -> AppResult<Production> {
        let mill = actor.as_mill()?;
        input.validate(&mill.report_limits)?;
        let farmer = self.load_farmer(input.farmer_id).await?;
        if farmer.mill_id != mill.id {
            return Err(AppError::forbidden(format!(
                "farmer {} is not registered with this mill",
                farmer.id
            )));
        }
        let production = Production::register(input, mill.id, &self.market.tokenomics, Utc::now());
        self.store.insert_production(&production).await?;
        tracing::info!(
            production_id = %production.id,
            farmer_id = %farmer.id,
            tonnage = production.tonnage,
            co2 = production.co2_equivalent,
            "production registered"
        );
        Ok(production)
    }

    async fn owned_by_mill(&self, actor: &Actor, id: Uuid) -> AppResult<Production> {
        let mill = actor.as_mill()?;
        let production = self.load_production(id).await?;
        if production.mill_id != mill.id {
            return Err(AppError::forbidden("this production belongs to another mill"));
        }
        Ok(production)
    }

    pub async fn validate_production(&self, actor: &Actor, id: Uuid) -> AppResult<Production> {
        let mut production = self.owned_by_mill(actor, id).await?;
        production.validate(actor.user.id, Utc::now())?;
        self.store.update_production(&production).await?;

        let delivered = FarmerStats {
            total_productions: 1,
            total_tonnes: production.tonnage,
            ..FarmerStats::default()
        };
        self.store.add_stats(&StatsDelta::Farmer(production.farmer_id, delivered)).await?;
        let received = MillStats {
            total_productions: 1,
            total_tonnes: production.tonnage,
            ..MillStats::default()
        };
        self.store.add_stats(&StatsDelta::Mill(production.mill_id, received)).await?;

        tracing::info!(production_id = %production.id, "production validated");
        Ok(production)
    }

    pub async fn reject_production(&self, actor: &Actor, id: Uuid, reason: &str) -> AppResult<Production> {
        let mut production = self.owned_by_mill(actor, id).await?;
        let minting = || AppError::Conflict("tokens are being minted for this production".into());
        if production.mint_claimed_at.is_some() {
            return Err(minting());
        }
        production.reject(reason, Utc::now())?;
        // the claim may have been taken since the read
        if !self.store.update_production_unclaimed(&production).await? {
            return Err(minting());
        }
        tracing::info!(production_id = %production.id, reason, "production rejected");
        Ok(production)
    }

    pub async fn list_productions(
        &self,
        actor: &Actor,
        filter: ProductionFilter,
        page: PageRequest,
    ) -> AppResult<Paged<Production>> {
        let filter = scoped(actor, filter)?;
        Ok(self.store.list_productions(&filter, page).await?)
    }

    pub async fn get_production(&self, actor: &Actor, id: Uuid) -> AppResult<Production> {
        let production = self.load_production(id).await?;
        if !can_view(actor, &production) {
            return Err(AppError::forbidden("no access to this production"));
        }
        Ok(production)
    }

    pub async fn production_stats(&self, actor: &Actor, filter: ProductionFilter) -> AppResult<ProductionStats> {
        let filter = scoped(actor, filter)?;
        let records = self.store.all_productions(&filter).await?;
        Ok(ProductionStats::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use crate::app::testkit::kit;
    use crate::domain::production::fixtures::input;
    use crate::domain::production::ProductionStatus;
    use crate::domain::profile::Profile;
    use crate::domain::PageRequest;
    use crate::storage::ProductionFilter;
    use axum::http::StatusCode;
    use chrono::Utc;

    #[tokio::test]
    async fn identical_reports_create_distinct_productions() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let farmer_id = farmer.profile.id().unwrap();

        let a = kit.market.register_production(&mill, input(farmer_id, 10.0)).await.unwrap();
        let b = kit.market.register_production(&mill, input(farmer_id, 10.0)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.tokens_generated, a.co2_equivalent);
        assert_eq!(a.season, "2024-2025");

        let listed = kit
            .market
            .list_productions(&farmer, ProductionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 2);
    }

    #[tokio::test]
    async fn only_the_farmers_mill_may_report() {
        let kit = kit();
        let norte = kit.mill("norte").await;
        let sur = kit.mill("sur").await;
        let farmer = kit.farmer("rosa", &norte, None).await;
        let farmer_id = farmer.profile.id().unwrap();

        let err = kit.market.register_production(&sur, input(farmer_id, 10.0)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = kit.market.register_production(&farmer, input(farmer_id, 10.0)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = kit
            .market
            .register_production(&norte, input(uuid::Uuid::new_v4(), 10.0))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        // above the default 1000 t reporting limit
        let err = kit.market.register_production(&norte, input(farmer_id, 1500.0)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validation_happens_once_and_updates_stats() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let p = kit
            .market
            .register_production(&mill, input(farmer.profile.id().unwrap(), 20.0))
            .await
            .unwrap();

        let validated = kit.market.validate_production(&mill, p.id).await.unwrap();
        assert_eq!(validated.status, ProductionStatus::Validated);
        assert_eq!(validated.checks.validated_by, Some(mill.user.id));

        let again = kit.market.validate_production(&mill, p.id).await.unwrap_err();
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
        let stored = kit.market.get_production(&mill, p.id).await.unwrap();
        assert_eq!(stored.status, ProductionStatus::Validated);
        assert_eq!(stored.updated_at, validated.updated_at);

        match kit.refresh(&farmer).await.profile {
            Profile::Farmer(f) => {
                assert_eq!(f.stats.total_productions, 1);
                assert_eq!(f.stats.total_tonnes, 20.0);
            }
            other => panic!("unexpected profile {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_annotated() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let p = kit
            .market
            .register_production(&mill, input(farmer.profile.id().unwrap(), 5.0))
            .await
            .unwrap();

        assert!(kit.market.reject_production(&mill, p.id, "  ").await.is_err());
        let rejected = kit.market.reject_production(&mill, p.id, "humedad alta").await.unwrap();
        assert_eq!(rejected.status, ProductionStatus::Rejected);
        assert!(rejected.notes.unwrap().starts_with("REJECTED: humedad alta."));
        assert!(kit.market.validate_production(&mill, p.id).await.is_err());
    }

    #[tokio::test]
    async fn rejection_loses_to_a_mint_claimed_after_the_read() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let p = kit
            .market
            .register_production(&mill, input(farmer.profile.id().unwrap(), 5.0))
            .await
            .unwrap();
        let mut stale = kit.market.validate_production(&mill, p.id).await.unwrap();
        assert!(kit.market.store.claim_mint(p.id, Utc::now()).await.unwrap());

        // a writer holding a pre-claim copy neither rejects nor clears the claim
        kit.market.store.update_production(&stale).await.unwrap();
        stale.reject("tarde", Utc::now()).unwrap();
        assert!(!kit.market.store.update_production_unclaimed(&stale).await.unwrap());

        let err = kit.market.reject_production(&mill, p.id, "tarde").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let stored = kit.market.get_production(&mill, p.id).await.unwrap();
        assert_eq!(stored.status, ProductionStatus::Validated);
        assert!(stored.mint_claimed_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_validations_keep_every_stats_increment() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let farmer_id = farmer.profile.id().unwrap();
        let mut ids = Vec::new();
        for tonnage in [10.0, 20.0, 30.0, 40.0] {
            ids.push(kit.market.register_production(&mill, input(farmer_id, tonnage)).await.unwrap().id);
        }

        let (a, b, c, d) = tokio::join!(
            kit.market.validate_production(&mill, ids[0]),
            kit.market.validate_production(&mill, ids[1]),
            kit.market.validate_production(&mill, ids[2]),
            kit.market.validate_production(&mill, ids[3]),
        );
        for result in [a, b, c, d] {
            result.unwrap();
        }

        match kit.refresh(&farmer).await.profile {
            Profile::Farmer(f) => {
                assert_eq!(f.stats.total_productions, 4);
                assert_eq!(f.stats.total_tonnes, 100.0);
            }
            other => panic!("unexpected profile {:?}", other),
        }
        match kit.refresh(&mill).await.profile {
            Profile::Mill(m) => assert_eq!(m.stats.total_productions, 4),
            other => panic!("unexpected profile {:?}", other),
        }
    }

    #[tokio::test]
    async fn stats_are_scoped_and_companies_are_refused() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let farmer_id = farmer.profile.id().unwrap();
        for tonnage in [10.0, 30.0] {
            kit.market.register_production(&mill, input(farmer_id, tonnage)).await.unwrap();
        }
        let stats = kit.market.production_stats(&mill, ProductionFilter::default()).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_tonnes, 20.0);
        assert_eq!(stats.by_status[&ProductionStatus::Registered], 2);

        let company = kit.company("textil", 'C').await;
        let err = kit.market.production_stats(&company, ProductionFilter::default()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}

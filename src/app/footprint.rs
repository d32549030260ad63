//! Company carbon footprints.

use super::{Actor, Marketplace};
use crate::domain::footprint::{compare, CarbonFootprint, FootprintComparison, FootprintInput, FootprintUpdate};
use crate::domain::profile::Profile;
use crate::error::{AppError, AppResult};
use crate::storage::FootprintFilter;
use chrono::Utc;
use uuid::Uuid;

impl Marketplace {
    fn token_price_cents(&self) -> i64 {
        self.market.tokenomics.token_price_cents
    }

    /// Loads a footprint the caller may read: its company or an administrator.
    async fn readable_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        let footprint = self
            .store
            .footprint(id)
            .await?
            .ok_or_else(|| AppError::not_found("footprint", id))?;
        match &actor.profile {
            Profile::Admin => Ok(footprint),
            Profile::Company(c) if c.id == footprint.company_id => Ok(footprint),
            _ => Err(AppError::forbidden("no access to this footprint")),
        }
    }

    async fn owned_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        let company = actor.as_company()?;
        let footprint = self.readable_footprint(actor, id).await?;
        if footprint.company_id != company.id {
            return Err(AppError::forbidden("this footprint belongs to another company"));
        }
        Ok(footprint)
    }

    pub async fn create_footprint(&self, actor: &Actor, input: FootprintInput) -> AppResult<CarbonFootprint> {
        let company = actor.as_company()?;
        let footprint = CarbonFootprint::create(company.id, input, self.token_price_cents(), Utc::now())?;
        self.store.insert_footprint(&footprint).await?;
        tracing::info!(
            footprint_id = %footprint.id,
            company_id = %company.id,
            year = footprint.year,
            total = footprint.totals.total,
            "footprint created"
        );
        Ok(footprint)
    }

    pub async fn get_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        self.readable_footprint(actor, id).await
    }

    pub async fn list_footprints(&self, actor: &Actor, mut filter: FootprintFilter) -> AppResult<Vec<CarbonFootprint>> {
        match &actor.profile {
            Profile::Company(c) => filter.company_id = Some(c.id),
            Profile::Admin => {}
            _ => return Err(AppError::forbidden("footprints are kept by companies")),
        }
        Ok(self.store.list_footprints(&filter).await?)
    }

    pub async fn update_footprint(&self, actor: &Actor, id: Uuid, update: FootprintUpdate) -> AppResult<CarbonFootprint> {
        let mut footprint = self.owned_footprint(actor, id).await?;
        footprint.update(update, self.token_price_cents(), Utc::now())?;
        self.store.update_footprint(&footprint).await?;
        Ok(footprint)
    }

    /// Re-derives emissions from the activity data with the standard factors.
    pub async fn recalculate_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        let mut footprint = self.owned_footprint(actor, id).await?;
        footprint.recalculate(self.token_price_cents(), Utc::now())?;
        self.store.update_footprint(&footprint).await?;
        Ok(footprint)
    }

    pub async fn submit_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        let mut footprint = self.owned_footprint(actor, id).await?;
        footprint.submit(Utc::now())?;
        self.store.update_footprint(&footprint).await?;
        tracing::info!(footprint_id = %footprint.id, "footprint submitted for validation");
        Ok(footprint)
    }

    pub async fn verify_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        actor.require_admin()?;
        let mut footprint = self.readable_footprint(actor, id).await?;
        footprint.verify(actor.user.id, Utc::now())?;
        self.store.update_footprint(&footprint).await?;
        tracing::info!(footprint_id = %footprint.id, verifier = %actor.user.id, "footprint verified");
        Ok(footprint)
    }

    pub async fn publish_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<CarbonFootprint> {
        let mut footprint = self.owned_footprint(actor, id).await?;
        footprint.publish(Utc::now())?;
        self.store.update_footprint(&footprint).await?;
        Ok(footprint)
    }

    /// Compares a footprint with the company's footprint for the previous
    /// year and the same reporting period.
    pub async fn compare_footprint(&self, actor: &Actor, id: Uuid) -> AppResult<FootprintComparison> {
        let current = self.readable_footprint(actor, id).await?;
        let filter = FootprintFilter {
            company_id: Some(current.company_id),
            year: Some(current.year - 1),
            status: None,
        };
        let previous = self
            .store
            .list_footprints(&filter)
            .await?
            .into_iter()
            .find(|f| f.period == current.period)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no {} footprint for {} to compare with",
                    current.period.as_str(),
                    current.year - 1
                ))
            })?;
        Ok(compare(&previous, &current))
    }
}

#[cfg(test)]
mod tests {
    use crate::app::testkit::kit;
    use crate::domain::footprint::fixtures::input;
    use crate::domain::footprint::{FootprintStatus, FootprintUpdate};
    use crate::storage::FootprintFilter;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn footprint_lifecycle() {
        let kit = kit();
        let company = kit.company("textil", 'C').await;
        let admin = kit.admin().await;

        let draft = kit.market.create_footprint(&company, input(2024)).await.unwrap();
        assert_eq!(draft.status, FootprintStatus::Draft);
        assert_eq!(draft.totals.total, 50.0);
        assert_eq!(draft.compensation.tokens_needed, 50.0);

        let dup = kit.market.create_footprint(&company, input(2024)).await.unwrap_err();
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        let updated = kit
            .market
            .update_footprint(
                &company,
                draft.id,
                FootprintUpdate {
                    compensation_pct: Some(50.0),
                    ..FootprintUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.compensation.tokens_needed, 25.0);

        // verification only follows submission
        assert!(kit.market.verify_footprint(&admin, draft.id).await.is_err());
        kit.market.submit_footprint(&company, draft.id).await.unwrap();
        let err = kit.market.verify_footprint(&company, draft.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let approved = kit.market.verify_footprint(&admin, draft.id).await.unwrap();
        assert_eq!(approved.verified_by, Some(admin.user.id));
        let published = kit.market.publish_footprint(&company, draft.id).await.unwrap();
        assert_eq!(published.status, FootprintStatus::Published);

        let locked = kit
            .market
            .update_footprint(&company, draft.id, FootprintUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(locked.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn footprints_are_private_to_their_company() {
        let kit = kit();
        let a = kit.company("alfa", 'A').await;
        let b = kit.company("beta", 'B').await;
        let fp = kit.market.create_footprint(&a, input(2024)).await.unwrap();

        let err = kit.market.get_footprint(&b, fp.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(kit.market.list_footprints(&b, FootprintFilter::default()).await.unwrap().is_empty());

        let admin = kit.admin().await;
        assert_eq!(kit.market.list_footprints(&admin, FootprintFilter::default()).await.unwrap().len(), 1);
        let mill = kit.mill("norte").await;
        assert!(kit.market.create_footprint(&mill, input(2024)).await.is_err());
    }

    #[tokio::test]
    async fn comparison_needs_the_previous_year() {
        let kit = kit();
        let company = kit.company("textil", 'C').await;
        let first = kit.market.create_footprint(&company, input(2023)).await.unwrap();
        let err = kit.market.compare_footprint(&company, first.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let mut next = input(2024);
        next.emissions.scope2.electricity = 10.0;
        let second = kit.market.create_footprint(&company, next).await.unwrap();
        let cmp = kit.market.compare_footprint(&company, second.id).await.unwrap();
        assert_eq!(cmp.previous_year, 2023);
        assert_eq!(cmp.scope2.change, -10.0);
        assert_eq!(cmp.scope2.change_pct, Some(-50.0));
        assert_eq!(cmp.total.current, 40.0);
    }
}

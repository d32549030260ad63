//! Profile maintenance and account administration.

use super::{Actor, Marketplace};
use crate::domain::profile::{Company, Farmer, Mill, Profile, ProfileStatus};
use crate::domain::user::{Role, User};
use crate::domain::{PageRequest, Paged};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total: u64,
    pub active: u64,
    pub email_verified: u64,
    pub by_role: BTreeMap<&'static str, u64>,
}

impl Marketplace {
    /// Applies an update document to the caller's own profile.
    pub async fn update_profile(&self, actor: &Actor, update: JsonValue) -> AppResult<Profile> {
        let mut profile = actor.profile.clone();
        profile.apply_update(update)?;
        self.store.save_profile(&profile).await?;
        tracing::info!(user_id = %actor.user.id, role = %actor.role(), "profile updated");
        Ok(profile)
    }

    /// Active mills, for the registration form.
    pub async fn list_mills(&self) -> AppResult<Vec<Mill>> {
        let mills = self.store.list_mills().await?;
        Ok(mills
            .into_iter()
            .filter(|m| m.status == ProfileStatus::Active)
            .collect())
    }

    /// Mills see their own farmers, administrators see all of them.
    pub async fn list_farmers(&self, actor: &Actor) -> AppResult<Vec<Farmer>> {
        let scope = match &actor.profile {
            Profile::Mill(m) => Some(m.id),
            Profile::Admin => None,
            _ => return Err(AppError::forbidden("only mills and administrators can list farmers")),
        };
        Ok(self.store.list_farmers(scope).await?)
    }

    pub async fn get_farmer(&self, actor: &Actor, id: Uuid) -> AppResult<Farmer> {
        let farmer = self.load_farmer(id).await?;
        let allowed = match &actor.profile {
            Profile::Admin => true,
            Profile::Mill(m) => farmer.mill_id == m.id,
            Profile::Farmer(f) => f.id == farmer.id,
            Profile::Company(_) => false,
        };
        if !allowed {
            return Err(AppError::forbidden("this farmer belongs to another mill"));
        }
        Ok(farmer)
    }

    pub async fn list_companies(&self, actor: &Actor) -> AppResult<Vec<Company>> {
        actor.require_admin()?;
        Ok(self.store.list_companies().await?)
    }

    pub async fn list_users(&self, actor: &Actor, role: Option<Role>, page: PageRequest) -> AppResult<Paged<User>> {
        actor.require_admin()?;
        let users = self.store.list_users(role).await?;
        Ok(Paged::from_all(users, page))
    }

    pub async fn set_user_active(&self, actor: &Actor, user_id: Uuid, active: bool) -> AppResult<User> {
        actor.require_admin()?;
        if user_id == actor.user.id && !active {
            return Err(AppError::validation("administrators cannot deactivate themselves"));
        }
        let mut user = self.load_user(user_id).await?;
        user.active = active;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        tracing::info!(admin_id = %actor.user.id, user_id = %user.id, active, "account activation changed");
        Ok(user)
    }

    pub async fn verify_email(&self, actor: &Actor, user_id: Uuid) -> AppResult<User> {
        actor.require_admin()?;
        let mut user = self.load_user(user_id).await?;
        if !user.email_verified {
            user.email_verified = true;
            user.updated_at = Utc::now();
            self.store.update_user(&user).await?;
        }
        Ok(user)
    }

    pub async fn user_stats(&self, actor: &Actor) -> AppResult<UserStats> {
        actor.require_admin()?;
        let users = self.store.list_users(None).await?;
        let mut by_role: BTreeMap<&'static str, u64> = Role::ALL.iter().map(|r| (r.as_str(), 0)).collect();
        for user in &users {
            *by_role.entry(user.role.as_str()).or_default() += 1;
        }
        Ok(UserStats {
            total: users.len() as u64,
            active: users.iter().filter(|u| u.active).count() as u64,
            email_verified: users.iter().filter(|u| u.email_verified).count() as u64,
            by_role,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::app::testkit::kit;
    use crate::domain::profile::Profile;
    use crate::domain::user::Role;
    use crate::domain::PageRequest;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn farmers_are_scoped_to_their_mill() {
        let kit = kit();
        let norte = kit.mill("norte").await;
        let sur = kit.mill("sur").await;
        let rosa = kit.farmer("rosa", &norte, None).await;
        kit.farmer("luis", &sur, None).await;

        let own = kit.market.list_farmers(&norte).await.unwrap();
        assert_eq!(own.len(), 1);
        let rosa_id = rosa.profile.id().unwrap();
        assert_eq!(own[0].id, rosa_id);

        assert_eq!(kit.market.get_farmer(&sur, rosa_id).await.unwrap_err().status(), StatusCode::FORBIDDEN);
        assert_eq!(kit.market.list_farmers(&rosa).await.unwrap_err().status(), StatusCode::FORBIDDEN);

        let admin = kit.admin().await;
        assert_eq!(kit.market.list_farmers(&admin).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn profile_updates_persist() {
        let kit = kit();
        let mill = kit.mill("centro").await;
        kit.market
            .update_profile(&mill, json!({ "trade_name": "Ingenio Centro" }))
            .await
            .unwrap();
        match kit.refresh(&mill).await.profile {
            Profile::Mill(m) => assert_eq!(m.trade_name, "Ingenio Centro"),
            other => panic!("unexpected profile {:?}", other),
        }
    }

    #[tokio::test]
    async fn admin_user_management() {
        let kit = kit();
        let mill = kit.mill("valle").await;
        let admin = kit.admin().await;

        let stats = kit.market.user_stats(&admin).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_role["mill"], 1);
        assert_eq!(stats.by_role["farmer"], 0);

        let mills = kit.market.list_users(&admin, Some(Role::Mill), PageRequest::default()).await.unwrap();
        assert_eq!(mills.total, 1);

        let off = kit.market.set_user_active(&admin, mill.user.id, false).await.unwrap();
        assert!(!off.active);
        assert!(kit.market.set_user_active(&admin, admin.user.id, false).await.is_err());
        assert_eq!(kit.market.user_stats(&mill).await.unwrap_err().status(), StatusCode::FORBIDDEN);

        let verified = kit.market.verify_email(&admin, mill.user.id).await.unwrap();
        assert!(verified.email_verified);
    }
}

//! # User Repository
//!
//! Users, their saved addresses, and the declared health profile
//! (allergies and illnesses) used for product warnings.

use std::collections::{BTreeSet, HashMap};

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use pharma_core::checkout::AddressInput;
use pharma_core::health::{ConditionKind, DeclaredCondition};
use pharma_core::{Address, Role, User};

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, role, branch_id, profile_address_id, has_health_profile";

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

pub(crate) async fn fetch_address(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Address>> {
    let address = sqlx::query_as::<_, Address>(
        "SELECT id, user_id, city_id, block, road, building, is_profile FROM addresses WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(address)
}

/// Inserts a non-profile address typed during checkout or plan creation.
pub(crate) async fn insert_address(
    conn: &mut SqliteConnection,
    user_id: i64,
    input: &AddressInput,
) -> DbResult<i64> {
    let city_id = input
        .city_id
        .ok_or_else(|| DbError::QueryFailed("address city is required".to_string()))?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO addresses (user_id, city_id, block, road, building, is_profile)
         VALUES (?1, ?2, ?3, ?4, ?5, 0) RETURNING id",
    )
    .bind(user_id)
    .bind(city_id)
    .bind(input.block.trim())
    .bind(input.road.trim())
    .bind(input.building.trim())
    .fetch_one(conn)
    .await?;

    debug!(address_id = id, user_id, "Address created");
    Ok(id)
}

/// Branch serving a city, if any.
pub(crate) async fn branch_for_city(conn: &mut SqliteConnection, city_id: i64) -> DbResult<Option<i64>> {
    let branch: Option<Option<i64>> = sqlx::query_scalar("SELECT branch_id FROM cities WHERE id = ?1")
        .bind(city_id)
        .fetch_optional(conn)
        .await?;
    Ok(branch.flatten())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn create(&self, new: &NewUser) -> DbResult<User> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (email, first_name, last_name, role, branch_id)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
        )
        .bind(new.email.trim())
        .bind(new.first_name.trim())
        .bind(new.last_name.trim())
        .bind(new.role)
        .bind(new.branch_id)
        .fetch_one(&self.pool)
        .await?;

        debug!(user_id = id, role = %new.role, "User created");
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id.to_string()))
    }

    /// Saves (or replaces) the user's profile address.
    pub async fn set_profile_address(&self, user_id: i64, input: &AddressInput) -> DbResult<Address> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE addresses SET is_profile = 0 WHERE user_id = ?1 AND is_profile = 1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let id = insert_address(&mut tx, user_id, input).await?;
        sqlx::query("UPDATE addresses SET is_profile = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET profile_address_id = ?1 WHERE id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let address = fetch_address(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Address", id.to_string()))?;
        tx.commit().await?;
        Ok(address)
    }

    pub async fn profile_address(&self, user: &User) -> DbResult<Option<Address>> {
        match user.profile_address_id {
            Some(id) => {
                let mut conn = self.pool.acquire().await?;
                fetch_address(&mut conn, id).await
            }
            None => Ok(None),
        }
    }

    /// Declares an allergy or illness on the user's health profile.
    pub async fn add_condition(&self, user_id: i64, kind: ConditionKind, condition_id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let sql = match kind {
            ConditionKind::Allergy => "INSERT OR IGNORE INTO user_allergies (user_id, allergy_id) VALUES (?1, ?2)",
            ConditionKind::Illness => "INSERT OR IGNORE INTO user_illnesses (user_id, illness_id) VALUES (?1, ?2)",
        };
        sqlx::query(sql).bind(user_id).bind(condition_id).execute(&mut *tx).await?;
        sqlx::query("UPDATE users SET has_health_profile = 1 WHERE id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// The user's declared allergies and illnesses with their ingredient ids.
    pub async fn declared_conditions(&self, user_id: i64) -> DbResult<Vec<DeclaredCondition>> {
        let rows: Vec<(String, i64, String, Option<i64>)> = sqlx::query_as(
            "SELECT 'Allergy', a.id, a.name, ai.ingredient_id
             FROM user_allergies ua
             JOIN allergies a ON a.id = ua.allergy_id
             LEFT JOIN allergy_ingredients ai ON ai.allergy_id = a.id
             WHERE ua.user_id = ?1
             UNION ALL
             SELECT 'Illness', i.id, i.name, ii.ingredient_id
             FROM user_illnesses ui
             JOIN illnesses i ON i.id = ui.illness_id
             LEFT JOIN illness_ingredients ii ON ii.illness_id = i.id
             WHERE ui.user_id = ?1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<(String, i64), DeclaredCondition> = HashMap::new();
        for (kind, id, name, ingredient) in rows {
            let kind_enum = if kind == "Allergy" {
                ConditionKind::Allergy
            } else {
                ConditionKind::Illness
            };
            let entry = grouped.entry((kind, id)).or_insert_with(|| DeclaredCondition {
                kind: kind_enum,
                name,
                ingredient_ids: BTreeSet::new(),
            });
            if let Some(ingredient) = ingredient {
                entry.ingredient_ids.insert(ingredient);
            }
        }

        Ok(grouped.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_create_and_profile_address() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("INSERT INTO cities (id, name) VALUES (1, 'Manama')")
            .execute(db.pool())
            .await
            .unwrap();

        let user = db
            .users()
            .create(&NewUser {
                email: "sara@example.com".into(),
                first_name: "Sara".into(),
                last_name: "Ali".into(),
                role: Role::Customer,
                branch_id: None,
            })
            .await
            .unwrap();
        assert_eq!(user.role, Role::Customer);
        assert!(user.profile_address_id.is_none());

        let input = AddressInput {
            city_id: Some(1),
            block: "304".into(),
            road: "3802".into(),
            building: "12".into(),
        };
        let address = db.users().set_profile_address(user.id, &input).await.unwrap();
        assert!(address.is_profile);

        let reloaded = db.users().get_by_email("SARA@example.com").await.unwrap().unwrap();
        assert_eq!(reloaded.profile_address_id, Some(address.id));
    }
}

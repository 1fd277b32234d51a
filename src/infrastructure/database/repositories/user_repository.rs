use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr,
};
use tracing::warn;

use crate::domain::{DomainError, DomainResult, ListParams, User, UserStore};
use crate::infrastructure::database::entities::user;
use crate::support::Deadline;

/// Largest integer the SQL driver will bind.
const SQL_INTEGER_MAX: u64 = i64::MAX as u64;

/// Durable user store on a SeaORM connection pool.
pub struct SeaOrmUserStore {
    db: DatabaseConnection,
}

impl SeaOrmUserStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

// ── Conversion helpers ──────────────────────────────────────────

fn user_model_to_domain(model: user::Model) -> User {
    User {
        name: model.name,
        password: model.password,
        email: model.email,
        full_name: model.full_name,
        created_at: model.created_at,
    }
}

fn user_to_active(u: User) -> user::ActiveModel {
    user::ActiveModel {
        name: Set(u.name),
        password: Set(u.password),
        email: Set(u.email),
        full_name: Set(u.full_name),
        created_at: Set(u.created_at),
    }
}

fn db_err(e: DbErr) -> DomainError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = e.sql_err() {
        return DomainError::AlreadyExists(detail);
    }
    match e {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => DomainError::Unavailable(e.to_string()),
        other => {
            let text = other.to_string();
            if text.contains("UNIQUE") || text.contains("duplicate") {
                DomainError::AlreadyExists(text)
            } else {
                warn!(error = %text, "Unexpected database error");
                DomainError::Unexpected(format!("Database error: {}", text))
            }
        }
    }
}

// ── Store implementation ────────────────────────────────────────

#[async_trait]
impl UserStore for SeaOrmUserStore {
    async fn create(&self, u: User, deadline: Deadline) -> DomainResult<()> {
        deadline
            .run("database create", async {
                user::Entity::insert(user_to_active(u))
                    .exec_without_returning(&self.db)
                    .await
                    .map_err(db_err)?;
                Ok(())
            })
            .await
    }

    async fn update(&self, u: User, deadline: Deadline) -> DomainResult<()> {
        deadline
            .run("database update", async {
                let result = user::Entity::update_many()
                    .col_expr(user::Column::Password, Expr::value(u.password))
                    .col_expr(user::Column::Email, Expr::value(u.email))
                    .col_expr(user::Column::FullName, Expr::value(u.full_name))
                    .filter(user::Column::Name.eq(u.name.as_str()))
                    .exec(&self.db)
                    .await
                    .map_err(db_err)?;

                if result.rows_affected == 0 {
                    return Err(DomainError::user_not_found(u.name));
                }
                Ok(())
            })
            .await
    }

    async fn delete(&self, name: &str, deadline: Deadline) -> DomainResult<()> {
        deadline
            .run("database delete", async {
                let result = user::Entity::delete_by_id(name.to_string())
                    .exec(&self.db)
                    .await
                    .map_err(db_err)?;

                if result.rows_affected == 0 {
                    return Err(DomainError::user_not_found(name));
                }
                Ok(())
            })
            .await
    }

    async fn get(&self, name: &str, deadline: Deadline) -> DomainResult<User> {
        deadline
            .run("database get", async {
                user::Entity::find_by_id(name.to_string())
                    .one(&self.db)
                    .await
                    .map_err(db_err)?
                    .map(user_model_to_domain)
                    .ok_or_else(|| DomainError::user_not_found(name))
            })
            .await
    }

    async fn list(&self, params: ListParams, deadline: Deadline) -> DomainResult<Vec<User>> {
        let order = if params.order { Order::Desc } else { Order::Asc };
        // SQLite binds integers as i64; a window past that is always empty.
        let start = params.start();
        if start > SQL_INTEGER_MAX {
            return Ok(Vec::new());
        }
        deadline
            .run("database list", async {
                let models = user::Entity::find()
                    .order_by(user::Column::Name, order)
                    .offset(start)
                    .limit(params.limit.min(SQL_INTEGER_MAX))
                    .all(&self.db)
                    .await
                    .map_err(db_err)?;

                Ok(models.into_iter().map(user_model_to_domain).collect())
            })
            .await
    }
}

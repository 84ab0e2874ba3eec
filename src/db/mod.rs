use crate::errors::{AppError, AppResult};
use crate::models::{
    ChangeEvent, ChangeKind, Complaint, ComplaintFilter, ComplaintStatus, District, Identity, NewComplaint,
    ServiceCategory,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const CHANGE_FEED_CAPACITY: usize = 256;
const COMPLAINT_COLUMNS: &str = "id, name, phone, address, district, service_category, description, user_id, user_email, status, admin_response, created_at";

pub const ADMIN_ROLE: &str = "admin";

/// Row-level visibility applied by the store to every complaint read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowScope {
    All,
    Owner(Uuid),
}

/// Persistence seam for complaint records. The store owns every record and
/// announces each write on its change feed.
pub trait ComplaintStore: Send + Sync {
    fn insert_complaint(&self, complaint: &NewComplaint) -> AppResult<Complaint>;

    /// Newest `created_at` first.
    fn list_complaints(&self, scope: RowScope, filter: &ComplaintFilter) -> AppResult<Vec<Complaint>>;

    fn get_complaint(&self, scope: RowScope, complaint_id: Uuid) -> AppResult<Option<Complaint>>;

    /// Returns `None` when no complaint has the given id. Requires `RowScope::All`.
    fn update_complaint_status(
        &self,
        scope: RowScope,
        complaint_id: Uuid,
        status: ComplaintStatus,
        admin_response: Option<&str>,
    ) -> AppResult<Option<Complaint>>;

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub identity: Identity,
    pub password_hash: String,
    pub password_salt: String,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Database {
    pub fn new(path: &Path, busy_timeout: Duration) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Store(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn publish(&self, kind: ChangeKind, complaint: &Complaint) {
        let event = ChangeEvent {
            kind,
            complaint_id: complaint.id,
            user_id: complaint.user_id,
            has_admin_response: complaint
                .admin_response
                .as_deref()
                .map(|response| !response.is_empty())
                .unwrap_or(false),
        };
        // No open subscriptions is not an error.
        let _ = self.changes.send(event);
    }

    pub fn insert_user(&self, email: &str, password_hash: &str, password_salt: &str) -> AppResult<Identity> {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        };
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO users (id, email, password_hash, password_salt, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.user_id.to_string(),
                email,
                password_hash,
                password_salt,
                format_time(Utc::now())
            ],
        );
        match inserted {
            Ok(_) => Ok(identity),
            Err(rusqlite::Error::SqliteFailure(failure, _)) if failure.code == ErrorCode::ConstraintViolation => Err(
                AppError::Validation(format!("An account already exists for {}", email)),
            ),
            Err(error) => Err(error.into()),
        }
    }

    pub fn find_credential(&self, email: &str) -> AppResult<Option<StoredCredential>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, password_hash, password_salt FROM users WHERE email = ?1",
            [email],
            |row| {
                Ok(StoredCredential {
                    identity: Identity {
                        user_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        email: row.get(1)?,
                    },
                    password_hash: row.get(2)?,
                    password_salt: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn grant_role(&self, user_id: Uuid, role: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id.to_string(), role],
        )?;
        Ok(())
    }

    pub fn has_role(&self, user_id: Uuid, role: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_roles WHERE user_id = ?1 AND role = ?2",
            params![user_id.to_string(), role],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_session(&self, token: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO auth_sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id.to_string(), format_time(Utc::now()), format_time(expires_at)],
        )?;
        Ok(())
    }

    pub fn find_session(&self, token: &str) -> AppResult<Option<(Identity, DateTime<Utc>)>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT u.id, u.email, s.expires_at
             FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            [token],
            |row| {
                Ok((
                    Identity {
                        user_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        email: row.get(1)?,
                    },
                    parse_time(&row.get::<_, String>(2)?)?,
                ))
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn delete_session(&self, token: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM auth_sessions WHERE token = ?1", [token])?;
        Ok(removed > 0)
    }

    pub fn prune_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM auth_sessions WHERE expires_at <= ?1", [format_time(now)])?;
        Ok(removed as u64)
    }
}

impl ComplaintStore for Database {
    fn insert_complaint(&self, complaint: &NewComplaint) -> AppResult<Complaint> {
        let record = Complaint {
            id: Uuid::new_v4(),
            name: complaint.name.clone(),
            phone: complaint.phone.clone(),
            address: complaint.address.clone(),
            district: complaint.district,
            service_category: complaint.service_category,
            description: complaint.description.clone(),
            user_id: complaint.user_id,
            user_email: complaint.user_email.clone(),
            status: ComplaintStatus::Pending,
            admin_response: None,
            created_at: Utc::now().trunc_subsecs(6),
        };

        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO complaints (
                   id, name, phone, address, district, service_category, description,
                   user_id, user_email, status, admin_response, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
                params![
                    record.id.to_string(),
                    record.name,
                    record.phone,
                    record.address,
                    record.district.as_str(),
                    record.service_category.as_str(),
                    record.description,
                    record.user_id.to_string(),
                    record.user_email,
                    record.status.as_str(),
                    format_time(record.created_at),
                ],
            )?;
        }

        self.publish(ChangeKind::Inserted, &record);
        Ok(record)
    }

    fn list_complaints(&self, scope: RowScope, filter: &ComplaintFilter) -> AppResult<Vec<Complaint>> {
        let conn = self.conn()?;
        let mut query = format!("SELECT {} FROM complaints WHERE 1 = 1", COMPLAINT_COLUMNS);
        let mut params_vec: Vec<String> = Vec::new();

        if let RowScope::Owner(user_id) = scope {
            query.push_str(" AND user_id = ?");
            params_vec.push(user_id.to_string());
        }
        if let Some(district) = filter.district {
            query.push_str(" AND district = ?");
            params_vec.push(district.as_str().to_string());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            params_vec.push(status.as_str().to_string());
        }
        if let Some(category) = filter.category {
            query.push_str(" AND service_category = ?");
            params_vec.push(category.as_str().to_string());
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(params_vec.iter()), parse_complaint_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn get_complaint(&self, scope: RowScope, complaint_id: Uuid) -> AppResult<Option<Complaint>> {
        let conn = self.conn()?;
        select_complaint(&conn, scope, complaint_id)
    }

    fn update_complaint_status(
        &self,
        scope: RowScope,
        complaint_id: Uuid,
        status: ComplaintStatus,
        admin_response: Option<&str>,
    ) -> AppResult<Option<Complaint>> {
        if scope != RowScope::All {
            return Err(AppError::Policy(
                "Complaint status may only be changed by an administrator".to_string(),
            ));
        }

        let updated = {
            let conn = self.conn()?;
            let changed = match admin_response {
                Some(response) => conn.execute(
                    "UPDATE complaints SET status = ?1, admin_response = ?2 WHERE id = ?3",
                    params![status.as_str(), response, complaint_id.to_string()],
                )?,
                None => conn.execute(
                    "UPDATE complaints SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), complaint_id.to_string()],
                )?,
            };
            if changed == 0 {
                return Ok(None);
            }
            select_complaint(&conn, RowScope::All, complaint_id)?
        };

        if let Some(complaint) = &updated {
            self.publish(ChangeKind::Updated, complaint);
        }
        Ok(updated)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn select_complaint(conn: &Connection, scope: RowScope, complaint_id: Uuid) -> AppResult<Option<Complaint>> {
    let result = match scope {
        RowScope::All => conn
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1", COMPLAINT_COLUMNS),
                [complaint_id.to_string()],
                parse_complaint_row,
            )
            .optional()?,
        RowScope::Owner(user_id) => conn
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1 AND user_id = ?2", COMPLAINT_COLUMNS),
                [complaint_id.to_string(), user_id.to_string()],
                parse_complaint_row,
            )
            .optional()?,
    };
    Ok(result)
}

fn parse_complaint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Complaint> {
    Ok(Complaint {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        address: row.get(3)?,
        district: parse_enum::<District>(&row.get::<_, String>(4)?)?,
        service_category: parse_enum::<ServiceCategory>(&row.get::<_, String>(5)?)?,
        description: row.get(6)?,
        user_id: parse_uuid(&row.get::<_, String>(7)?)?,
        user_email: row.get(8)?,
        status: parse_enum::<ComplaintStatus>(&row.get::<_, String>(9)?)?,
        admin_response: row.get(10)?,
        created_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

fn conversion_failure(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_enum<T>(raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = AppError>,
{
    T::from_str(raw).map_err(|error| conversion_failure(error.detail().to_string()))
}

fn parse_uuid(raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|error| conversion_failure(error.to_string()))
}

fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_failure(error.to_string()))
}

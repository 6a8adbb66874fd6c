use argonautica::{Hasher, Verifier};
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::{prelude::*, result::DatabaseErrorKind, result::Error as DBError};
use log::error;
use uuid::Uuid;

use crate::AppData;
use crate::fingerprint::{device_fingerprint, DeviceDescriptor};
use crate::models::{IdType, PermissionType, Session, User, UserAccess, UserDevice};
use crate::schema::user_account;
use crate::web::errors::{ServiceError, ServiceResult};

/// Fixed session lifetime.
pub const SESSION_DURATION_DAYS: i64 = 7;

/// Sessions with less than this left are reported as expiring soon.
pub const EXPIRY_WARNING_HOURS: i64 = 1;

/// How many devices a non-admin account may log in from.
pub const MAX_DEVICES_PER_USER: i64 = 3;

pub fn hash_password(secret_key: &str, password: &str) -> Result<String, ServiceError> {
    Hasher::default()
        .with_password(password)
        .with_secret_key(secret_key)
        .hash()
        .map_err(|err| ServiceError::InternalServerError(format!("Hashing error: {}", err)))
}

pub fn verify_hash(secret_key: &str, hash: &str, password: &str) -> bool {
    Verifier::default()
        .with_hash(hash)
        .with_password(password)
        .with_secret_key(secret_key)
        .verify()
        .map_err(|err| error!("Password verification error: {}", err))
        .unwrap_or(false)
}

/// A session is valid strictly before its expiry instant.
pub fn session_is_expired(session: &Session, now: NaiveDateTime) -> bool {
    now >= session.expires_at
}

pub fn session_expiring_soon(session: &Session, now: NaiveDateTime) -> bool {
    let remaining = session.expires_at - now;
    remaining > Duration::zero() && remaining < Duration::hours(EXPIRY_WARNING_HOURS)
}

#[derive(Insertable, AsChangeset)]
#[table_name="user_account"]
pub struct UserInputDb {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub last_password_change: Option<NaiveDateTime>,
    pub permission: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct SessionStore {
    password_secret_key: String,
}

impl SessionStore {
    pub fn new(password_secret_key: String) -> Self {
        SessionStore {
            password_secret_key
        }
    }

    pub fn add_user(&self, ctx: &AppData, username: String, password: String, permission: PermissionType, phone_number: Option<String>) -> ServiceResult<User> {
        use crate::schema::user_account::dsl;

        let now = Utc::now().naive_utc();
        let password_hash = hash_password(self.password_secret_key.as_str(), password.as_str())?;

        let value = UserInputDb {
            username: Some(username),
            password_hash: Some(password_hash),
            last_password_change: Some(now),
            permission: Some(permission.to_char().to_string()),
            phone_number,
            is_active: Some(true),
        };

        let conn = ctx.pool.get()?;

        Ok(diesel::insert_into(dsl::user_account)
            .values(value)
            .get_result(&conn)?)
    }

    fn find_user_by_username(&self, ctx: &AppData, username: &str) -> ServiceResult<Option<User>> {
        use crate::schema::user_account::dsl;

        let conn = ctx.pool.get()?;
        Ok(dsl::user_account.filter(dsl::username.eq(username)).first::<User>(&conn).optional()?)
    }

    pub fn find_user_by_id(&self, ctx: &AppData, id: IdType) -> ServiceResult<Option<User>> {
        use crate::schema::user_account::dsl;

        let conn = ctx.pool.get()?;
        Ok(dsl::user_account.find(id).first::<User>(&conn).optional()?)
    }

    pub fn verify_user(&self, ctx: &AppData, username: &str, password: &str) -> ServiceResult<User> {
        let user = match self.find_user_by_username(ctx, username)? {
            None => return Err(ServiceError::NotFound("username".to_string())),
            Some(u) => u
        };

        if !verify_hash(self.password_secret_key.as_str(), user.password_hash.as_str(), password) {
            Err(ServiceError::WrongPassword)
        } else if !user.is_active {
            Err(ServiceError::AccountDisabled)
        } else {
            Ok(user)
        }
    }

    pub fn update_user(&self, ctx: &AppData, id: IdType, username: Option<String>, password: Option<String>,
                       permission: Option<PermissionType>, phone_number: Option<String>, is_active: Option<bool>) -> ServiceResult<User> {
        use crate::schema::user_account::dsl;

        let (new_passw_hash, new_change_time) = match password {
            Some(x) => (
                Some(hash_password(self.password_secret_key.as_str(), x.as_str())?),
                Some(Utc::now().naive_utc())
            ),
            None => (None, None),
        };

        let data = UserInputDb {
            username,
            password_hash: new_passw_hash,
            last_password_change: new_change_time,
            permission: permission.map(|x| x.to_char().to_string()),
            phone_number,
            is_active,
        };

        let conn = ctx.pool.get()?;

        Ok(diesel::update(dsl::user_account.find(id))
            .set(&data)
            .get_result(&conn)?)
    }

    pub fn delete_user(&self, ctx: &AppData, id: IdType) -> ServiceResult<()> {
        use crate::schema::user_account::dsl;
        let conn = ctx.pool.get()?;

        let del_count = diesel::delete(dsl::user_account.find(id))
            .execute(&conn)?;

        if del_count != 1 {
            Err(ServiceError::NotFound("user".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn give_access(&self, ctx: &AppData, user_id: IdType, department_id: IdType) -> ServiceResult<()> {
        use crate::schema::user_access::dsl;
        let conn = ctx.pool.get()?;

        let inserted = diesel::insert_into(dsl::user_access)
            .values(UserAccess { user_id, department_id })
            .on_conflict_do_nothing()
            .execute(&conn);

        match inserted {
            Err(DBError::DatabaseError(kind, info)) => match kind {
                DatabaseErrorKind::ForeignKeyViolation => Err(ServiceError::NotFound("user or department".to_string())),
                x => Err(DBError::DatabaseError(x, info).into()),
            },
            Err(x) => {
                Err(x.into())
            },
            Ok(insert_count) => {
                if insert_count == 0 {
                    Err(ServiceError::AlreadyPresent("Access".to_string()))
                } else {
                    Ok(())
                }
            },
        }
    }

    pub fn revoke_access(&self, ctx: &AppData, user_id: IdType, department_id: IdType) -> ServiceResult<()> {
        use crate::schema::user_access::dsl;
        let conn = ctx.pool.get()?;

        let deleted_count = diesel::delete(dsl::user_access)
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::department_id.eq(department_id))
            .execute(&conn)?;

        if deleted_count == 0 {
            Err(ServiceError::NotFound("user or department".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn has_access(&self, ctx: &AppData, user_id: IdType, department_id: IdType) -> ServiceResult<bool> {
        use crate::schema::user_access::dsl;
        let conn = ctx.pool.get()?;

        let count: i64 = dsl::user_access
            .count()
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::department_id.eq(department_id))
            .get_result(&conn)?;

        Ok(count != 0)
    }

    /// Opens a server-side session for the user, returning its row.
    /// The identity cookie carries only the session uuid.
    pub fn create_session(&self, ctx: &AppData, user: &User) -> ServiceResult<Session> {
        use crate::schema::session::dsl;

        let now = Utc::now().naive_utc();
        let value = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            created_at: now,
            expires_at: now + Duration::days(SESSION_DURATION_DAYS),
            last_activity: now,
        };

        let conn = ctx.pool.get()?;
        Ok(diesel::insert_into(dsl::session)
            .values(&value)
            .get_result(&conn)?)
    }

    /// Resolves an identity cookie back to a user and its session.
    ///
    /// Returns None (never an error) for anything stale: unknown or expired
    /// sessions, disabled accounts, and sessions older than the user's last
    /// password change. Expired rows are deleted on sight, valid ones get
    /// their `last_activity` touched.
    pub fn parse_identity(&self, ctx: &AppData, identity: &str) -> ServiceResult<Option<(User, Session)>> {
        use crate::schema::session::dsl;

        let session_id = match Uuid::parse_str(identity) {
            Ok(x) => x,
            Err(_) => return Ok(None),
        };

        let conn = ctx.pool.get()?;
        let session = match dsl::session.find(session_id).first::<Session>(&conn).optional()? {
            None => return Ok(None),
            Some(s) => s,
        };

        let now = Utc::now().naive_utc();
        if session_is_expired(&session, now) {
            diesel::delete(dsl::session.find(session_id)).execute(&conn)?;
            return Ok(None);
        }

        std::mem::drop(conn);
        let user = match self.find_user_by_id(ctx, session.user_id)? {
            None => return Ok(None),
            Some(u) => u,
        };

        if !user.is_active || user.last_password_change > session.created_at {
            self.destroy_session(ctx, session.id)?;
            return Ok(None);
        }

        let conn = ctx.pool.get()?;
        let session = diesel::update(dsl::session.find(session_id))
            .set(dsl::last_activity.eq(now))
            .get_result::<Session>(&conn)?;

        Ok(Some((user, session)))
    }

    /// Extends the session by another full lifetime.
    pub fn renew_session(&self, ctx: &AppData, session_id: Uuid) -> ServiceResult<Session> {
        use crate::schema::session::dsl;

        let now = Utc::now().naive_utc();
        let conn = ctx.pool.get()?;

        Ok(diesel::update(dsl::session.find(session_id))
            .set((
                dsl::expires_at.eq(now + Duration::days(SESSION_DURATION_DAYS)),
                dsl::last_activity.eq(now),
            ))
            .get_result(&conn)?)
    }

    pub fn destroy_session(&self, ctx: &AppData, session_id: Uuid) -> ServiceResult<()> {
        use crate::schema::session::dsl;
        let conn = ctx.pool.get()?;

        diesel::delete(dsl::session.find(session_id)).execute(&conn)?;
        Ok(())
    }

    /// Remote revocation: drops every session the user holds.
    pub fn destroy_user_sessions(&self, ctx: &AppData, user_id: IdType) -> ServiceResult<usize> {
        use crate::schema::session::dsl;
        let conn = ctx.pool.get()?;

        Ok(diesel::delete(dsl::session.filter(dsl::user_id.eq(user_id))).execute(&conn)?)
    }

    /// Registers or refreshes the device a login comes from.
    ///
    /// Known devices get `last_seen` touched. Unknown devices are added while
    /// the account is under its device bound; past it the login is rejected.
    /// Admin accounts are never rejected.
    pub fn register_device(&self, ctx: &AppData, user: &User, descriptor: &DeviceDescriptor) -> ServiceResult<UserDevice> {
        use crate::schema::user_device::dsl;

        let fingerprint = device_fingerprint(descriptor);
        let now = Utc::now().naive_utc();
        let conn = ctx.pool.get()?;

        let known = dsl::user_device
            .filter(dsl::user_id.eq(user.id))
            .filter(dsl::fingerprint.eq(fingerprint.as_str()))
            .first::<UserDevice>(&conn)
            .optional()?;

        if let Some(device) = known {
            return Ok(diesel::update(dsl::user_device.find(device.id))
                .set(dsl::last_seen.eq(now))
                .get_result(&conn)?);
        }

        if user.get_permission() != PermissionType::Admin {
            let count: i64 = dsl::user_device
                .count()
                .filter(dsl::user_id.eq(user.id))
                .get_result(&conn)?;
            if count >= MAX_DEVICES_PER_USER {
                return Err(ServiceError::DeviceNotAuthorized);
            }
        }

        Ok(diesel::insert_into(dsl::user_device)
            .values((
                dsl::user_id.eq(user.id),
                dsl::fingerprint.eq(fingerprint.as_str()),
                dsl::label.eq(descriptor.platform.as_str()),
                dsl::first_seen.eq(now),
                dsl::last_seen.eq(now),
            ))
            .get_result(&conn)?)
    }

    pub fn remove_device(&self, ctx: &AppData, user_id: IdType, device_id: IdType) -> ServiceResult<()> {
        use crate::schema::user_device::dsl;
        let conn = ctx.pool.get()?;

        let deleted = diesel::delete(dsl::user_device
                .filter(dsl::id.eq(device_id))
                .filter(dsl::user_id.eq(user_id)))
            .execute(&conn)?;

        if deleted == 0 {
            Err(ServiceError::NotFound("device".to_string()))
        } else {
            Ok(())
        }
    }
}

pub trait PermissionCheckable {
    fn ensure_admin(&self) -> ServiceResult<()>;

    fn ensure_department_visible(&self, ctx: &AppData, department_id: IdType) -> ServiceResult<()>;

    fn ensure_tank_visible(&self, ctx: &AppData, tank_id: IdType) -> ServiceResult<()>;
}

impl PermissionCheckable for User {
    fn ensure_admin(&self) -> Result<(), ServiceError> {
        if self.get_permission() != PermissionType::Admin {
            Err(ServiceError::Unauthorized)
        } else {
            Ok(())
        }
    }

    fn ensure_department_visible(&self, ctx: &AppData, department_id: IdType) -> ServiceResult<()> {
        use crate::schema::user_access::dsl;
        if self.get_permission() == PermissionType::Admin {
            return Ok(())
        }
        let conn = ctx.pool.get()?;

        let count: i64 = dsl::user_access.count()
            .filter(dsl::user_id.eq(self.id))
            .filter(dsl::department_id.eq(department_id))
            .get_result(&conn)?;

        if count == 0 {
            Err(ServiceError::NotFound("Department".to_string()))
        } else {
            Ok(())
        }
    }

    fn ensure_tank_visible(&self, ctx: &AppData, tank_id: IdType) -> ServiceResult<()> {
        use crate::schema::user_access::dsl;
        use crate::schema::tank::dsl as tank_dsl;
        if self.get_permission() == PermissionType::Admin {
            return Ok(())
        }
        let conn = ctx.pool.get()?;

        let department_id = tank_dsl::tank
            .find(tank_id)
            .select(tank_dsl::department_id)
            .single_value();

        let count: i64 = dsl::user_access.count()
            .filter(dsl::user_id.eq(self.id))
            .filter(dsl::department_id.nullable().eq(department_id))
            .get_result(&conn)?;

        if count == 0 {
            Err(ServiceError::NotFound("Tank".to_string()))
        } else {
            Ok(())
        }
    }
}

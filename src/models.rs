use bigdecimal::{BigDecimal, ToPrimitive};
use derive_more::Display;
use diesel::{PgConnection, r2d2::ConnectionManager};
use uuid::Uuid;

use crate::calc::TankSpec;

use super::schema::*;

// type alias to use in multiple places
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type IdType = i32;

#[derive(Debug, Display, Clone, Copy, juniper::GraphQLEnum, PartialEq)]
pub enum PermissionType {
    User,
    Admin
}

impl PermissionType {
    pub fn from_char(name: &str) -> Option<PermissionType> {
        match name {
            "u" => Some(PermissionType::User),
            "a" => Some(PermissionType::Admin),
            _ => None,
        }
    }

    pub fn to_char(&self) -> &str {
        match self {
            PermissionType::User => "u",
            PermissionType::Admin => "a",
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[table_name = "user_account"]
pub struct User {
    pub id: IdType,
    pub username: String,
    pub password_hash: String,
    pub last_password_change: chrono::NaiveDateTime,
    pub permission: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
}

impl User {
    pub fn get_permission(&self) -> PermissionType {
        PermissionType::from_char(self.permission.as_str()).unwrap_or(PermissionType::User)
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct Department {
    pub id: IdType,
    pub code: String,
    pub name: String,
}

// Explicit column tuples for queries that join through user_access and
// only want the joined table's columns back.
pub type DepartmentAllColumns = (department::id, department::code, department::name);
pub const DEPARTMENT_ALL_COLUMNS: DepartmentAllColumns =
    (department::id, department::code, department::name);

#[derive(Debug, Queryable, Insertable)]
#[table_name="user_access"]
pub struct UserAccess {
    pub user_id: IdType,
    pub department_id: IdType,
}

#[derive(Debug, Clone, Queryable)]
pub struct Tank {
    pub id: IdType,
    pub department_id: IdType,
    pub number: String,
    pub product: Option<String>,
    pub bbl_per_meter: BigDecimal,
    pub min_level: BigDecimal,
    pub max_level: BigDecimal,
    pub enabled: bool,
}

pub type TankAllColumns = (
    tank::id,
    tank::department_id,
    tank::number,
    tank::product,
    tank::bbl_per_meter,
    tank::min_level,
    tank::max_level,
    tank::enabled,
);
pub const TANK_ALL_COLUMNS: TankAllColumns = (
    tank::id,
    tank::department_id,
    tank::number,
    tank::product,
    tank::bbl_per_meter,
    tank::min_level,
    tank::max_level,
    tank::enabled,
);

impl Tank {
    /// Calibration constants as plain floats, for the arithmetic module.
    pub fn spec(&self) -> TankSpec {
        TankSpec {
            bbl_per_meter: self.bbl_per_meter.to_f64().unwrap_or(0.0),
            min_level: self.min_level.to_f64().unwrap_or(0.0),
            max_level: self.max_level.to_f64().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[table_name="session"]
pub struct Session {
    pub id: Uuid,
    pub user_id: IdType,
    pub created_at: chrono::NaiveDateTime,
    pub expires_at: chrono::NaiveDateTime,
    pub last_activity: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Queryable)]
pub struct UserDevice {
    pub id: IdType,
    pub user_id: IdType,
    pub fingerprint: String,
    pub label: Option<String>,
    pub first_seen: chrono::NaiveDateTime,
    pub last_seen: chrono::NaiveDateTime,
}

#[derive(Debug, Queryable, Insertable)]
#[table_name="fcm_user_contact"]
pub struct FcmUserContact {
    pub registration_id: String,
    pub user_id: IdType,
}

#[derive(Debug, Clone, Queryable)]
pub struct LiveTank {
    pub id: IdType,
    pub tank_id: IdType,
    pub product: Option<String>,
    pub level: Option<BigDecimal>,
    pub target_type: String,
    pub target_value: BigDecimal,
    pub flow_rate: BigDecimal,
    pub flow_unit: String,
    pub finish_at: chrono::NaiveDateTime,
    pub notes: Option<String>,
    pub status: String,
    pub added_by: IdType,
    pub added_at: chrono::NaiveDateTime,
    pub modified_by: Option<IdType>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable)]
pub struct TankReminder {
    pub id: IdType,
    pub tank_id: IdType,
    pub user_id: IdType,
    pub phone_number: Option<String>,
    pub intervals: Vec<i32>,
    pub sent_intervals: Vec<i32>,
    pub finish_at: chrono::NaiveDateTime,
    pub active: bool,
    pub last_sent: Option<chrono::NaiveDateTime>,
    pub last_error: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Queryable)]
pub struct Activity {
    pub id: IdType,
    pub username: Option<String>,
    pub action: String,
    pub page: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

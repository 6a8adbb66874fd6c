use std::cell::RefCell;
use std::string::ToString;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDateTime, Utc};
use diesel::{
    pg::PgConnection,
    prelude::*,
};
use diesel::r2d2::ConnectionManager;
use juniper::RootNode;
use r2d2::PooledConnection;

use crate::AppData;
use crate::audit;
use crate::calc;
use crate::fingerprint::DeviceDescriptor;
use crate::models::{Activity, Department, DEPARTMENT_ALL_COLUMNS, FcmUserContact, IdType,
                    LiveTank, PermissionType, Session, Tank, TANK_ALL_COLUMNS, TankReminder,
                    User, UserAccess, UserDevice};
use crate::schema::*;
use crate::security::PermissionCheckable;
use crate::web::twilio_service::is_kuwait_number;

use super::errors::{ServiceError, ServiceResult};

pub struct Context {
    pub app: Arc<AppData>,
    pub identity: RefCell<Option<String>>,
    pub user: RefCell<Option<User>>,
    pub session: RefCell<Option<Session>>,
    pub user_agent: Option<String>,
    pub operation_name: Option<String>,
}

impl Context {
    pub fn get_connection(&self) -> ServiceResult<PooledConnection<ConnectionManager<PgConnection>>> {
        Ok(self.app.pool.get()?)
    }

    pub fn get_user(&self) -> ServiceResult<Option<User>> {
        Ok(self.user.borrow().clone())
    }

    pub fn get_user_required(&self) -> ServiceResult<User> {
        self.get_user()?.ok_or(ServiceError::LoginRequired)
    }

    pub fn get_session_required(&self) -> ServiceResult<Session> {
        self.session.borrow().clone().ok_or(ServiceError::LoginRequired)
    }

    pub fn save_login(&self, user: User, session: Session) {
        self.identity.replace(Some(session.id.to_string()));
        self.user.replace(Some(user));
        self.session.replace(Some(session));
    }

    pub fn clear_login(&self) {
        self.identity.replace(None);
        self.user.replace(None);
        self.session.replace(None);
    }

    /// Best-effort audit trail, never fails the request.
    pub fn log_activity(&self, action: &str) {
        if let Ok(conn) = self.app.pool.get() {
            let user = self.user.borrow();
            audit::record_activity(
                &conn,
                user.as_ref().map(|x| x.username.as_str()),
                action,
                self.operation_name.as_deref(),
                self.user_agent.as_deref(),
            );
        }
    }
}

impl juniper::Context for Context {}

#[derive(Debug, Clone, Copy, juniper::GraphQLEnum, PartialEq)]
pub enum TargetType {
    Pumpable,
    Ullage,
    Level,
}

impl TargetType {
    fn to_target(self, value: f64) -> calc::Target {
        match self {
            TargetType::Pumpable => calc::Target::Pumpable(value),
            TargetType::Ullage => calc::Target::Ullage(value),
            TargetType::Level => calc::Target::Level(value),
        }
    }

    fn from_name(name: &str) -> Option<TargetType> {
        match name {
            "pumpable" => Some(TargetType::Pumpable),
            "ullage" => Some(TargetType::Ullage),
            "level" => Some(TargetType::Level),
            _ => None,
        }
    }

    fn to_name(self) -> &'static str {
        match self {
            TargetType::Pumpable => "pumpable",
            TargetType::Ullage => "ullage",
            TargetType::Level => "level",
        }
    }
}

#[derive(Debug, Clone, Copy, juniper::GraphQLEnum, PartialEq)]
pub enum FlowUnit {
    BarrelsPerHour,
    CubicMetersPerHour,
    MetersPerHour,
}

impl FlowUnit {
    fn to_flow(self, rate: f64) -> calc::FlowRate {
        match self {
            FlowUnit::BarrelsPerHour => calc::FlowRate::BarrelsPerHour(rate),
            FlowUnit::CubicMetersPerHour => calc::FlowRate::CubicMetersPerHour(rate),
            FlowUnit::MetersPerHour => calc::FlowRate::MetersPerHour(rate),
        }
    }

    fn from_name(name: &str) -> Option<FlowUnit> {
        match name {
            "bbl_h" => Some(FlowUnit::BarrelsPerHour),
            "m3_h" => Some(FlowUnit::CubicMetersPerHour),
            "m_h" => Some(FlowUnit::MetersPerHour),
            _ => None,
        }
    }

    fn to_name(self) -> &'static str {
        match self {
            FlowUnit::BarrelsPerHour => "bbl_h",
            FlowUnit::CubicMetersPerHour => "m3_h",
            FlowUnit::MetersPerHour => "m_h",
        }
    }
}

#[derive(Debug, juniper::GraphQLObject, PartialEq)]
pub struct CalcResult {
    pub available_pumpable: f64,
    pub current_ullage: f64,
    pub estimated_level: f64,
    pub level_difference: f64,
    pub volume_difference: f64,
    pub high_level: bool,
    pub hours: Option<f64>,
    pub finish_at: Option<NaiveDateTime>,
}

impl From<calc::Estimate> for CalcResult {
    fn from(x: calc::Estimate) -> CalcResult {
        CalcResult {
            available_pumpable: x.available_pumpable,
            current_ullage: x.current_ullage,
            estimated_level: x.estimated_level,
            level_difference: x.level_difference,
            volume_difference: x.volume_difference,
            high_level: x.high_level,
            hours: x.hours,
            finish_at: x.finish_at,
        }
    }
}

pub struct SessionInfo {
    session: Session,
}

#[juniper::object(
    description = "The caller's current session",
    Context = Context,
)]
impl SessionInfo {
    pub fn id(&self) -> String {
        self.session.id.to_string()
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.session.created_at
    }

    pub fn expires_at(&self) -> NaiveDateTime {
        self.session.expires_at
    }

    pub fn last_activity(&self) -> NaiveDateTime {
        self.session.last_activity
    }

    pub fn expiring_soon(&self) -> bool {
        crate::security::session_expiring_soon(&self.session, Utc::now().naive_utc())
    }
}

fn load_user_departments(ctx: &Context, user_id: IdType) -> ServiceResult<Vec<Department>> {
    use crate::schema::department::dsl as department_dsl;
    use crate::schema::user_access::dsl as user_access;

    let conn = ctx.get_connection()?;

    Ok(user_access::user_access.filter(user_access::user_id.eq(user_id))
        .inner_join(department_dsl::department)
        .select(DEPARTMENT_ALL_COLUMNS)
        .load::<Department>(&conn)?)
}

fn load_user_departments_filtered(ctx: &Context, user_id: IdType, ids: Vec<IdType>) -> ServiceResult<Vec<Department>> {
    use crate::schema::department::dsl as department_dsl;
    use crate::schema::user_access::dsl as user_access;

    let conn = ctx.get_connection()?;

    Ok(user_access::user_access.filter(user_access::user_id.eq(user_id))
        .inner_join(department_dsl::department)
        .filter(department_dsl::id.eq_any(ids))
        .select(DEPARTMENT_ALL_COLUMNS)
        .load::<Department>(&conn)?)
}

#[juniper::object(
    description = "An user account",
    Context = Context,
)]
impl User {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    pub fn permission(&self) -> PermissionType {
        self.get_permission()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn departments(&self, ctx: &Context) -> ServiceResult<Vec<Department>> {
        load_user_departments(ctx, self.id)
    }

    /// Devices bound to this account, visible to the owner and to admins.
    pub fn devices(&self, ctx: &Context) -> ServiceResult<Vec<UserDevice>> {
        use crate::schema::user_device::dsl;

        let requester = ctx.get_user_required()?;
        if requester.id != self.id {
            requester.ensure_admin()?;
        }

        let conn = ctx.get_connection()?;
        Ok(dsl::user_device.filter(dsl::user_id.eq(self.id))
            .order(dsl::last_seen.desc())
            .load::<UserDevice>(&conn)?)
    }
}

#[juniper::object(
    description = "A refinery department",
    Context = Context,
)]
impl Department {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn tanks(&self, ctx: &Context) -> ServiceResult<Vec<Tank>> {
        use crate::schema::tank::dsl::*;

        let connection = ctx.get_connection()?;
        Ok(tank.filter(department_id.eq(self.id))
            .order(number.asc())
            .load::<Tank>(&connection)?)
    }
}

#[juniper::object(
    description = "A user access entry",
    Context = Context,
)]
impl UserAccess {
    pub fn user_id(&self) -> IdType {
        self.user_id
    }

    pub fn department_id(&self) -> IdType {
        self.department_id
    }

    pub fn user(&self, ctx: &Context) -> ServiceResult<User> {
        use crate::schema::user_account::dsl::*;
        let connection = ctx.get_connection()?;
        Ok(user_account.find(self.user_id).first::<User>(&connection)?)
    }

    pub fn department(&self, ctx: &Context) -> ServiceResult<Department> {
        use crate::schema::department::dsl::*;
        let connection = ctx.get_connection()?;
        Ok(department.find(self.department_id).first::<Department>(&connection)?)
    }
}

#[juniper::object(
    description = "A storage tank with its calibration constants",
    Context = Context,
)]
impl Tank {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn department_id(&self) -> IdType {
        self.department_id
    }

    pub fn number(&self) -> &str {
        self.number.as_str()
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn bbl_per_meter(&self) -> f64 {
        self.bbl_per_meter.to_f64().unwrap_or(0.0)
    }

    pub fn min_level(&self) -> f64 {
        self.min_level.to_f64().unwrap_or(0.0)
    }

    pub fn max_level(&self) -> f64 {
        self.max_level.to_f64().unwrap_or(0.0)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn capacity(&self) -> f64 {
        self.spec().capacity()
    }

    pub fn department(&self, ctx: &Context) -> ServiceResult<Department> {
        use crate::schema::department::dsl::*;
        let connection = ctx.get_connection()?;
        Ok(department.find(self.department_id).first::<Department>(&connection)?)
    }
}

#[juniper::object(
    description = "A tank currently being pumped or filled",
    Context = Context,
)]
impl LiveTank {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn tank_id(&self) -> IdType {
        self.tank_id
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn level(&self) -> Option<f64> {
        self.level.as_ref().and_then(|x| x.to_f64())
    }

    pub fn target_type(&self) -> TargetType {
        TargetType::from_name(self.target_type.as_str()).unwrap_or(TargetType::Level)
    }

    pub fn target_value(&self) -> f64 {
        self.target_value.to_f64().unwrap_or(0.0)
    }

    pub fn flow_rate(&self) -> f64 {
        self.flow_rate.to_f64().unwrap_or(0.0)
    }

    pub fn flow_unit(&self) -> FlowUnit {
        FlowUnit::from_name(self.flow_unit.as_str()).unwrap_or(FlowUnit::BarrelsPerHour)
    }

    pub fn finish_at(&self) -> NaiveDateTime {
        self.finish_at
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn status(&self) -> &str {
        self.status.as_str()
    }

    pub fn added_by(&self) -> IdType {
        self.added_by
    }

    pub fn added_at(&self) -> NaiveDateTime {
        self.added_at
    }

    pub fn modified_by(&self) -> Option<IdType> {
        self.modified_by
    }

    pub fn modified_at(&self) -> Option<NaiveDateTime> {
        self.modified_at
    }

    pub fn tank(&self, ctx: &Context) -> ServiceResult<Tank> {
        use crate::schema::tank::dsl::*;
        let connection = ctx.get_connection()?;
        Ok(tank.find(self.tank_id).first::<Tank>(&connection)?)
    }
}

#[juniper::object(
    description = "A scheduled finish-time reminder",
    Context = Context,
)]
impl TankReminder {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn tank_id(&self) -> IdType {
        self.tank_id
    }

    pub fn user_id(&self) -> IdType {
        self.user_id
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn intervals(&self) -> Vec<i32> {
        self.intervals.clone()
    }

    pub fn sent_intervals(&self) -> Vec<i32> {
        self.sent_intervals.clone()
    }

    pub fn finish_at(&self) -> NaiveDateTime {
        self.finish_at
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn last_sent(&self) -> Option<NaiveDateTime> {
        self.last_sent
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn tank(&self, ctx: &Context) -> ServiceResult<Tank> {
        use crate::schema::tank::dsl::*;
        let connection = ctx.get_connection()?;
        Ok(tank.find(self.tank_id).first::<Tank>(&connection)?)
    }
}

#[juniper::object(
    description = "An audit trail entry",
    Context = Context,
)]
impl Activity {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    pub fn page(&self) -> Option<&str> {
        self.page.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }
}

#[juniper::object(
    description = "A device bound to an account",
    Context = Context,
)]
impl UserDevice {
    pub fn id(&self) -> IdType {
        self.id
    }

    pub fn user_id(&self) -> IdType {
        self.user_id
    }

    pub fn fingerprint(&self) -> &str {
        self.fingerprint.as_str()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn first_seen(&self) -> NaiveDateTime {
        self.first_seen
    }

    pub fn last_seen(&self) -> NaiveDateTime {
        self.last_seen
    }
}

pub struct QueryRoot;

#[juniper::object(
    Context = Context
)]
impl QueryRoot {
    fn api_version() -> &str {
        "1.0"
    }

    fn user_me(ctx: &Context) -> ServiceResult<Option<User>> {
        ctx.get_user()
    }

    fn session_info(ctx: &Context) -> ServiceResult<Option<SessionInfo>> {
        Ok(ctx.session.borrow().clone().map(|session| SessionInfo { session }))
    }

    fn users(ctx: &Context) -> ServiceResult<Vec<User>> {
        use crate::schema::user_account::dsl::*;
        ctx.get_user_required()?.ensure_admin()?;

        let connection = ctx.get_connection()?;
        Ok(user_account.order(username.asc()).load::<User>(&connection)?)
    }

    fn user(ctx: &Context, id: IdType) -> ServiceResult<User> {
        let user = ctx.get_user_required()?;

        if id == user.id {
            return Ok(user);
        }

        user.ensure_admin()?;// Only if the user didn't query himself

        match ctx.app.sessions.find_user_by_id(&ctx.app, id)? {
            Some(user) => Ok(user),
            None => Err(ServiceError::NotFound("User".to_string()))
        }
    }

    fn departments(ctx: &Context, ids: Option<Vec<IdType>>) -> ServiceResult<Vec<Department>> {
        let user = ctx.get_user_required()?;

        let len = ids.as_ref().map(|x| x.len());

        let departments: Vec<Department> = match user.get_permission() {
            PermissionType::Admin => {
                use crate::schema::department::dsl as department_dsl;

                let conn = ctx.get_connection()?;
                if let Some(filter_ids) = ids {
                    department_dsl::department.filter(department_dsl::id.eq_any(filter_ids)).load::<Department>(&conn)?
                } else {
                    department_dsl::department.load::<Department>(&conn)?
                }
            },
            PermissionType::User => {
                if let Some(filter_ids) = ids {
                    load_user_departments_filtered(ctx, user.id, filter_ids)?
                } else {
                    load_user_departments(ctx, user.id)?
                }
            }
        };

        if let Some(l) = len {
            if l != departments.len() {
                return Err(ServiceError::NotFound("Department".to_string()))
            }
        }

        Ok(departments)
    }

    fn department(ctx: &Context, id: IdType) -> ServiceResult<Department> {
        use crate::schema::department::dsl;

        let user = ctx.get_user_required()?;
        user.ensure_department_visible(&ctx.app, id)?;

        let conn = ctx.get_connection()?;

        let department: Department = dsl::department.find(id)
            .first::<Department>(&conn)
            .optional()
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("Department".to_string()))?;
        Ok(department)
    }

    fn tanks(ctx: &Context, ids: Vec<IdType>) -> ServiceResult<Vec<Tank>> {
        use crate::schema::department::dsl as department_dsl;
        use crate::schema::tank::dsl as tank_dsl;
        use crate::schema::user_access::dsl as user_access;

        let user = ctx.get_user_required()?;
        let conn = ctx.get_connection()?;

        let ids_len = ids.len();

        let tanks = if user.get_permission() == PermissionType::Admin {
            tank_dsl::tank
                .filter(tank_dsl::id.eq_any(ids))
                .load::<Tank>(&conn)?
        } else {
            user_access::user_access
                .filter(user_access::user_id.eq(user.id))
                .inner_join(department_dsl::department.inner_join(tank_dsl::tank))
                .filter(tank_dsl::id.eq_any(ids))
                .select(TANK_ALL_COLUMNS)
                .load::<Tank>(&conn)?
        };

        if tanks.len() != ids_len {
            return Err(ServiceError::NotFound("Tank".to_string()))
        }
        Ok(tanks)
    }

    fn tank(ctx: &Context, id: IdType) -> ServiceResult<Tank> {
        use crate::schema::tank::dsl;

        let user = ctx.get_user_required()?;
        user.ensure_tank_visible(&ctx.app, id)?;

        let conn = ctx.get_connection()?;

        let tank: Tank = dsl::tank.find(id)
            .first::<Tank>(&conn)
            .optional()
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound("Tank".to_string()))?;
        Ok(tank)
    }

    /// Pumpable, ullage and finish-time arithmetic for one tank, without
    /// touching the live board.
    fn tank_calc(
        ctx: &Context,
        tank_id: IdType,
        level: f64,
        target_type: TargetType,
        target_value: f64,
        flow_rate: Option<f64>,
        flow_unit: Option<FlowUnit>,
    ) -> ServiceResult<CalcResult> {
        use crate::schema::tank::dsl;

        let user = ctx.get_user_required()?;
        user.ensure_tank_visible(&ctx.app, tank_id)?;

        let conn = ctx.get_connection()?;
        let tank: Tank = dsl::tank.find(tank_id)
            .first::<Tank>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Tank".to_string()))?;

        let flow = match (flow_rate, flow_unit) {
            (Some(rate), Some(unit)) => Some(unit.to_flow(rate)),
            (Some(rate), None) => Some(FlowUnit::BarrelsPerHour.to_flow(rate)),
            _ => None,
        };

        let estimate = calc::estimate(
            &tank.spec(),
            level,
            target_type.to_target(target_value),
            flow,
            Utc::now().naive_utc(),
        );
        Ok(estimate.into())
    }

    fn live_tanks(ctx: &Context) -> ServiceResult<Vec<LiveTank>> {
        use crate::schema::live_tank::dsl;
        use crate::schema::tank::dsl as tank_dsl;
        use crate::schema::user_access::dsl as user_access;

        let user = ctx.get_user_required()?;
        let conn = ctx.get_connection()?;

        let live = if user.get_permission() == PermissionType::Admin {
            dsl::live_tank.order(dsl::added_at.desc()).load::<LiveTank>(&conn)?
        } else {
            let visible_departments = user_access::user_access
                .filter(user_access::user_id.eq(user.id))
                .select(user_access::department_id);

            let visible_tanks = tank_dsl::tank
                .filter(tank_dsl::department_id.eq_any(visible_departments))
                .select(tank_dsl::id);

            dsl::live_tank
                .filter(dsl::tank_id.eq_any(visible_tanks))
                .order(dsl::added_at.desc())
                .load::<LiveTank>(&conn)?
        };

        Ok(live)
    }

    /// The caller's reminders; admins see everyone's.
    fn reminders(ctx: &Context, active_only: Option<bool>) -> ServiceResult<Vec<TankReminder>> {
        use crate::schema::tank_reminder::dsl;

        let user = ctx.get_user_required()?;
        let conn = ctx.get_connection()?;

        let mut query = dsl::tank_reminder.into_boxed();
        if user.get_permission() != PermissionType::Admin {
            query = query.filter(dsl::user_id.eq(user.id));
        }
        if active_only.unwrap_or(false) {
            query = query.filter(dsl::active.eq(true));
        }

        Ok(query.order(dsl::finish_at.asc()).load::<TankReminder>(&conn)?)
    }

    fn activities(ctx: &Context, limit: Option<i32>) -> ServiceResult<Vec<Activity>> {
        use crate::schema::activity::dsl;

        ctx.get_user_required()?.ensure_admin()?;

        let limit = limit.unwrap_or(100).max(1).min(1000) as i64;
        let conn = ctx.get_connection()?;

        Ok(dsl::activity
            .order(dsl::created_at.desc())
            .limit(limit)
            .load::<Activity>(&conn)?)
    }
}

pub struct MutationRoot;

#[derive(juniper::GraphQLInputObject)]
pub struct AuthInput {
    username: String,
    password: String,
}

#[derive(juniper::GraphQLInputObject)]
pub struct UserInput {
    username: String,
    password: String,
    permission: PermissionType,
    phone_number: Option<String>,
}

#[derive(juniper::GraphQLInputObject)]
pub struct UserUpdateInput {
    username: Option<String>,
    password: Option<String>,
    permission: Option<PermissionType>,
    phone_number: Option<String>,
    is_active: Option<bool>,
}

#[derive(juniper::GraphQLInputObject, Insertable)]
#[table_name="department"]
pub struct DepartmentInput {
    code: String,
    name: String,
}

#[derive(juniper::GraphQLInputObject, AsChangeset)]
#[table_name="department"]
pub struct DepartmentUpdateInput {
    code: Option<String>,
    name: Option<String>,
}

#[derive(juniper::GraphQLInputObject)]
pub struct TankInput {
    pub number: String,
    pub product: Option<String>,
    pub bbl_per_meter: f64,
    pub min_level: f64,
    pub max_level: f64,
    pub enabled: Option<bool>,
}

#[derive(juniper::GraphQLInputObject)]
pub struct TankUpdateInput {
    pub number: Option<String>,
    pub product: Option<String>,
    pub bbl_per_meter: Option<f64>,
    pub min_level: Option<f64>,
    pub max_level: Option<f64>,
    pub enabled: Option<bool>,
}

#[derive(Insertable, AsChangeset)]
#[table_name="tank"]
pub struct TankUpdateInputDb {
    pub number: Option<String>,
    pub product: Option<String>,
    pub bbl_per_meter: Option<BigDecimal>,
    pub min_level: Option<BigDecimal>,
    pub max_level: Option<BigDecimal>,
    pub enabled: Option<bool>,
}

impl From<TankUpdateInput> for TankUpdateInputDb {
    fn from(x: TankUpdateInput) -> TankUpdateInputDb {
        TankUpdateInputDb {
            number: x.number,
            product: x.product,
            bbl_per_meter: x.bbl_per_meter.map(|p| p.into()),
            min_level: x.min_level.map(|p| p.into()),
            max_level: x.max_level.map(|p| p.into()),
            enabled: x.enabled,
        }
    }
}

#[derive(juniper::GraphQLInputObject)]
pub struct LiveTankInput {
    pub product: Option<String>,
    pub level: f64,
    pub target_type: TargetType,
    pub target_value: f64,
    pub flow_rate: f64,
    pub flow_unit: FlowUnit,
    pub notes: Option<String>,
}

#[derive(juniper::GraphQLInputObject)]
pub struct LiveTankUpdateInput {
    pub product: Option<String>,
    pub level: Option<f64>,
    pub target_type: Option<TargetType>,
    pub target_value: Option<f64>,
    pub flow_rate: Option<f64>,
    pub flow_unit: Option<FlowUnit>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

#[derive(Insertable)]
#[table_name="live_tank"]
struct LiveTankInsertDb {
    tank_id: IdType,
    product: Option<String>,
    level: Option<BigDecimal>,
    target_type: String,
    target_value: BigDecimal,
    flow_rate: BigDecimal,
    flow_unit: String,
    finish_at: NaiveDateTime,
    notes: Option<String>,
    status: String,
    added_by: IdType,
    added_at: NaiveDateTime,
}

#[derive(juniper::GraphQLInputObject)]
pub struct ReminderInput {
    pub finish_at: NaiveDateTime,
    pub intervals: Vec<i32>,
    pub phone_number: Option<String>,
}

#[derive(Insertable)]
#[table_name="tank_reminder"]
struct ReminderInsertDb {
    tank_id: IdType,
    user_id: IdType,
    phone_number: Option<String>,
    intervals: Vec<i32>,
    sent_intervals: Vec<i32>,
    finish_at: NaiveDateTime,
    active: bool,
    created_at: NaiveDateTime,
}

const LIVE_TANK_STATUSES: &[&str] = &["active", "paused", "done"];

fn live_tank_estimate(tank: &Tank, level: f64, target: calc::Target, flow: calc::FlowRate) -> ServiceResult<NaiveDateTime> {
    let estimate = calc::estimate(&tank.spec(), level, target, Some(flow), Utc::now().naive_utc());
    estimate.finish_at
        .ok_or_else(|| ServiceError::BadRequest("A positive flow rate is required".to_string()))
}

#[juniper::object(
    Context = Context
)]
impl MutationRoot {
    fn login(ctx: &Context, auth: AuthInput, device: Option<DeviceDescriptor>) -> ServiceResult<User> {
        let user = match ctx.app.sessions.verify_user(&ctx.app, auth.username.as_str(), auth.password.as_str()) {
            Ok(user) => user,
            Err(err) => {
                ctx.log_activity("login_failed");
                return Err(err);
            }
        };

        if let Some(descriptor) = device.as_ref() {
            if let Err(err) = ctx.app.sessions.register_device(&ctx.app, &user, descriptor) {
                ctx.log_activity("login_rejected_device");
                return Err(err);
            }
        }

        let session = ctx.app.sessions.create_session(&ctx.app, &user)?;
        ctx.save_login(user.clone(), session);
        ctx.log_activity("login");
        Ok(user)
    }

    fn logout(ctx: &Context) -> ServiceResult<bool> {
        if let Some(session) = ctx.session.borrow().as_ref() {
            ctx.app.sessions.destroy_session(&ctx.app, session.id)?;
        }
        ctx.log_activity("logout");
        ctx.clear_login();
        Ok(true)
    }

    /// Revokes every session of the caller, on every device.
    fn logout_all(ctx: &Context) -> ServiceResult<i32> {
        let user = ctx.get_user_required()?;
        let destroyed = ctx.app.sessions.destroy_user_sessions(&ctx.app, user.id)?;
        ctx.log_activity("logout_all");
        ctx.clear_login();
        Ok(destroyed as i32)
    }

    fn renew_session(ctx: &Context) -> ServiceResult<SessionInfo> {
        ctx.get_user_required()?;
        let session = ctx.get_session_required()?;
        let session = ctx.app.sessions.renew_session(&ctx.app, session.id)?;
        ctx.session.replace(Some(session.clone()));
        Ok(SessionInfo { session })
    }

    fn add_user(ctx: &Context, data: UserInput) -> ServiceResult<User> {
        ctx.get_user_required()?.ensure_admin()?;
        let user = ctx.app.sessions.add_user(&ctx.app, data.username, data.password, data.permission, data.phone_number)?;
        ctx.log_activity("add_user");
        Ok(user)
    }

    fn update_user(ctx: &Context, id: IdType, data: UserUpdateInput) -> ServiceResult<User> {
        let user = ctx.get_user_required()?;

        if id != user.id || data.username.is_some() || data.permission.is_some() || data.is_active.is_some() {
            user.ensure_admin()?
        }

        let own_password_changed = id == user.id && data.password.is_some();

        let res = ctx.app.sessions.update_user(
            &ctx.app, id,
            data.username, data.password, data.permission,
            data.phone_number, data.is_active,
        )?;

        // Changing your own password kills every session, including this
        // one, so hand back a fresh one.
        if own_password_changed {
            let session = ctx.app.sessions.create_session(&ctx.app, &res)?;
            ctx.save_login(res.clone(), session);
        }

        ctx.log_activity("update_user");
        Ok(res)
    }

    fn delete_user(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        let user = ctx.get_user_required()?;
        user.ensure_admin()?;
        if user.id == id {
            return Err(ServiceError::BadRequest("Cannot delete your own account".to_string()))
        }
        ctx.app.sessions.delete_user(&ctx.app, id)?;
        ctx.log_activity("delete_user");
        Ok(true)
    }

    fn give_user_access(ctx: &Context, user_id: IdType, department_ids: Vec<IdType>) -> ServiceResult<bool> {
        ctx.get_user_required()?.ensure_admin()?;
        for department_id in department_ids {
            ctx.app.sessions.give_access(&ctx.app, user_id, department_id)?;
        }
        ctx.log_activity("give_user_access");
        Ok(true)
    }

    fn revoke_user_access(ctx: &Context, user_id: IdType, department_ids: Vec<IdType>) -> ServiceResult<bool> {
        ctx.get_user_required()?.ensure_admin()?;
        for department_id in department_ids {
            ctx.app.sessions.revoke_access(&ctx.app, user_id, department_id)?;
        }
        ctx.log_activity("revoke_user_access");
        Ok(true)
    }

    fn add_fcm_contact(ctx: &Context, registration_id: String) -> ServiceResult<bool> {
        use crate::schema::fcm_user_contact::dsl;
        let user = ctx.get_user_required()?;

        if registration_id.len() > 255 {
            return Err(ServiceError::BadRequest("registration_id too long".to_owned()))
        }

        let conn = ctx.get_connection()?;

        diesel::insert_into(dsl::fcm_user_contact)
            .values(FcmUserContact {
                registration_id,
                user_id: user.id,
            })
            .on_conflict_do_nothing()
            .execute(&conn)?;

        Ok(true)
    }

    fn delete_fcm_contact(ctx: &Context, registration_id: String) -> ServiceResult<bool> {
        use crate::schema::fcm_user_contact::dsl;
        let user = ctx.get_user_required()?;

        if registration_id.len() > 255 {
            return Ok(true)// Not even going to query the db, the string cannot be present
        }

        let conn = ctx.get_connection()?;

        diesel::delete(dsl::fcm_user_contact)
            .filter(dsl::registration_id.eq(registration_id))
            .filter(dsl::user_id.eq(user.id))
            .execute(&conn)?;

        Ok(true)
    }

    fn remove_device(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        use crate::schema::user_device::dsl;

        let user = ctx.get_user_required()?;
        let conn = ctx.get_connection()?;

        let device: UserDevice = dsl::user_device.find(id)
            .first::<UserDevice>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Device".to_string()))?;

        if device.user_id != user.id {
            user.ensure_admin()?;
        }
        std::mem::drop(conn);

        ctx.app.sessions.remove_device(&ctx.app, device.user_id, id)?;
        ctx.log_activity("remove_device");
        Ok(true)
    }

    fn add_department(ctx: &Context, data: DepartmentInput) -> ServiceResult<Department> {
        use crate::schema::department::dsl;

        ctx.get_user_required()?.ensure_admin()?;
        let conn = ctx.get_connection()?;

        let department = diesel::insert_into(dsl::department)
            .values(data)
            .get_result::<Department>(&conn)?;
        ctx.log_activity("add_department");
        Ok(department)
    }

    fn update_department(ctx: &Context, id: IdType, data: DepartmentUpdateInput) -> ServiceResult<Department> {
        use crate::schema::department::dsl;

        ctx.get_user_required()?.ensure_admin()?;
        let conn = ctx.get_connection()?;

        let department = diesel::update(dsl::department.find(id))
            .set(&data)
            .get_result(&conn)?;
        ctx.log_activity("update_department");
        Ok(department)
    }

    fn delete_department(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        use crate::schema::department::dsl;

        ctx.get_user_required()?.ensure_admin()?;
        let conn = ctx.get_connection()?;

        let del_count = diesel::delete(dsl::department.find(id))
            .execute(&conn)?;

        if del_count != 1 {
            return Err(ServiceError::NotFound("Department".to_string()))
        }
        ctx.log_activity("delete_department");
        Ok(true)
    }

    fn add_tank(ctx: &Context, department_id: IdType, data: TankInput) -> ServiceResult<Tank> {
        use crate::schema::tank::dsl;

        ctx.get_user_required()?.ensure_admin()?;

        if data.min_level >= data.max_level {
            return Err(ServiceError::BadRequest("min_level must be below max_level".to_string()))
        }
        if data.bbl_per_meter <= 0.0 {
            return Err(ServiceError::BadRequest("bbl_per_meter must be positive".to_string()))
        }

        let conn = ctx.get_connection()?;

        let db_data = TankUpdateInputDb {
            number: Some(data.number),
            product: data.product,
            bbl_per_meter: Some(data.bbl_per_meter.into()),
            min_level: Some(data.min_level.into()),
            max_level: Some(data.max_level.into()),
            enabled: Some(data.enabled.unwrap_or(true)),
        };

        let res = diesel::insert_into(dsl::tank)
            .values((db_data, dsl::department_id.eq(department_id)))
            .get_result::<Tank>(&conn)?;
        ctx.log_activity("add_tank");
        Ok(res)
    }

    fn update_tank(ctx: &Context, id: IdType, data: TankUpdateInput) -> ServiceResult<Tank> {
        use crate::schema::tank::dsl;

        ctx.get_user_required()?.ensure_admin()?;
        let conn = ctx.get_connection()?;

        let data: TankUpdateInputDb = data.into();

        let tank = diesel::update(dsl::tank.find(id))
            .set(&data)
            .get_result(&conn)?;
        ctx.log_activity("update_tank");
        Ok(tank)
    }

    fn delete_tank(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        use crate::schema::tank::dsl;

        ctx.get_user_required()?.ensure_admin()?;
        let conn = ctx.get_connection()?;

        let del_count = diesel::delete(dsl::tank.find(id))
            .execute(&conn)?;

        if del_count != 1 {
            Err(ServiceError::NotFound("Tank".to_string()))
        } else {
            ctx.log_activity("delete_tank");
            Ok(true)
        }
    }

    /// Puts a tank on the live board. The finish time is computed from the
    /// current level, the target and the flow rate.
    fn add_live_tank(ctx: &Context, tank_id: IdType, data: LiveTankInput) -> ServiceResult<LiveTank> {
        use crate::schema::live_tank::dsl;
        use crate::schema::tank::dsl as tank_dsl;

        let user = ctx.get_user_required()?;
        user.ensure_tank_visible(&ctx.app, tank_id)?;

        let conn = ctx.get_connection()?;
        let tank: Tank = tank_dsl::tank.find(tank_id)
            .first::<Tank>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Tank".to_string()))?;

        let finish_at = live_tank_estimate(
            &tank,
            data.level,
            data.target_type.to_target(data.target_value),
            data.flow_unit.to_flow(data.flow_rate),
        )?;

        let value = LiveTankInsertDb {
            tank_id,
            product: data.product.or_else(|| tank.product.clone()),
            level: Some(data.level.into()),
            target_type: data.target_type.to_name().to_string(),
            target_value: data.target_value.into(),
            flow_rate: data.flow_rate.into(),
            flow_unit: data.flow_unit.to_name().to_string(),
            finish_at,
            notes: data.notes,
            status: "active".to_string(),
            added_by: user.id,
            added_at: Utc::now().naive_utc(),
        };

        let res = diesel::insert_into(dsl::live_tank)
            .values(value)
            .get_result::<LiveTank>(&conn)?;
        ctx.log_activity("add_live_tank");
        Ok(res)
    }

    fn update_live_tank(ctx: &Context, id: IdType, data: LiveTankUpdateInput) -> ServiceResult<LiveTank> {
        use crate::schema::live_tank::dsl;
        use crate::schema::tank::dsl as tank_dsl;

        let user = ctx.get_user_required()?;

        let conn = ctx.get_connection()?;
        let current: LiveTank = dsl::live_tank.find(id)
            .first::<LiveTank>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Live tank".to_string()))?;
        user.ensure_tank_visible(&ctx.app, current.tank_id)?;

        if let Some(status) = data.status.as_deref() {
            if !LIVE_TANK_STATUSES.contains(&status) {
                return Err(ServiceError::BadRequest(format!("Unknown status '{}'", status)))
            }
        }

        let tank: Tank = tank_dsl::tank.find(current.tank_id)
            .first::<Tank>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Tank".to_string()))?;

        // Merge, then recompute the finish time from the merged values. A
        // change that touches none of the estimate inputs (e.g. marking the
        // tank done) keeps the stored finish time.
        let estimate_changed = data.level.is_some()
            || data.target_type.is_some()
            || data.target_value.is_some()
            || data.flow_rate.is_some()
            || data.flow_unit.is_some();

        let level = data.level
            .or_else(|| current.level.as_ref().and_then(|x| x.to_f64()))
            .ok_or_else(|| ServiceError::BadRequest("A level is required".to_string()))?;
        let target_type = data.target_type
            .or_else(|| TargetType::from_name(current.target_type.as_str()))
            .unwrap_or(TargetType::Level);
        let target_value = data.target_value
            .or_else(|| current.target_value.to_f64())
            .unwrap_or(0.0);
        let flow_rate = data.flow_rate
            .or_else(|| current.flow_rate.to_f64())
            .unwrap_or(0.0);
        let flow_unit = data.flow_unit
            .or_else(|| FlowUnit::from_name(current.flow_unit.as_str()))
            .unwrap_or(FlowUnit::BarrelsPerHour);

        let finish_at = if estimate_changed {
            live_tank_estimate(
                &tank,
                level,
                target_type.to_target(target_value),
                flow_unit.to_flow(flow_rate),
            )?
        } else {
            current.finish_at
        };

        let res = diesel::update(dsl::live_tank.find(id))
            .set((
                dsl::product.eq(data.product.or(current.product)),
                dsl::level.eq(Some(BigDecimal::from(level))),
                dsl::target_type.eq(target_type.to_name()),
                dsl::target_value.eq(BigDecimal::from(target_value)),
                dsl::flow_rate.eq(BigDecimal::from(flow_rate)),
                dsl::flow_unit.eq(flow_unit.to_name()),
                dsl::finish_at.eq(finish_at),
                dsl::notes.eq(data.notes.or(current.notes)),
                dsl::status.eq(data.status.unwrap_or(current.status)),
                dsl::modified_by.eq(Some(user.id)),
                dsl::modified_at.eq(Some(Utc::now().naive_utc())),
            ))
            .get_result::<LiveTank>(&conn)?;
        ctx.log_activity("update_live_tank");
        Ok(res)
    }

    fn remove_live_tank(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        use crate::schema::live_tank::dsl;

        let user = ctx.get_user_required()?;

        let conn = ctx.get_connection()?;
        let current: LiveTank = dsl::live_tank.find(id)
            .first::<LiveTank>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Live tank".to_string()))?;
        user.ensure_tank_visible(&ctx.app, current.tank_id)?;

        diesel::delete(dsl::live_tank.find(id)).execute(&conn)?;
        ctx.log_activity("remove_live_tank");
        Ok(true)
    }

    fn schedule_reminder(ctx: &Context, tank_id: IdType, data: ReminderInput) -> ServiceResult<TankReminder> {
        use crate::schema::tank_reminder::dsl;

        let user = ctx.get_user_required()?;
        user.ensure_tank_visible(&ctx.app, tank_id)?;

        if data.intervals.is_empty() {
            return Err(ServiceError::BadRequest("At least one interval is required".to_string()))
        }
        if data.intervals.iter().any(|x| *x <= 0) {
            return Err(ServiceError::BadRequest("Intervals must be positive minutes".to_string()))
        }
        if data.finish_at <= Utc::now().naive_utc() {
            return Err(ServiceError::BadRequest("finish_at must be in the future".to_string()))
        }
        if let Some(phone) = data.phone_number.as_deref() {
            if !is_kuwait_number(phone) {
                return Err(ServiceError::BadRequest("Invalid phone number format. Use +965XXXXXXXX".to_string()))
            }
        }

        let mut intervals = data.intervals;
        intervals.sort_unstable_by(|a, b| b.cmp(a));
        intervals.dedup();

        let value = ReminderInsertDb {
            tank_id,
            user_id: user.id,
            phone_number: data.phone_number,
            intervals,
            sent_intervals: Vec::new(),
            finish_at: data.finish_at,
            active: true,
            created_at: Utc::now().naive_utc(),
        };

        let conn = ctx.get_connection()?;
        let res = diesel::insert_into(dsl::tank_reminder)
            .values(value)
            .get_result::<TankReminder>(&conn)?;
        ctx.log_activity("schedule_reminder");
        Ok(res)
    }

    fn cancel_reminder(ctx: &Context, id: IdType) -> ServiceResult<bool> {
        use crate::schema::tank_reminder::dsl;

        let user = ctx.get_user_required()?;
        let conn = ctx.get_connection()?;

        let reminder: TankReminder = dsl::tank_reminder.find(id)
            .first::<TankReminder>(&conn)
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("Reminder".to_string()))?;

        if reminder.user_id != user.id {
            user.ensure_admin()?;
        }

        diesel::update(dsl::tank_reminder.find(id))
            .set(dsl::active.eq(false))
            .execute(&conn)?;
        ctx.log_activity("cancel_reminder");
        Ok(true)
    }
}

pub type Schema = RootNode<'static, QueryRoot, MutationRoot>;

pub fn create_schema() -> Schema {
    Schema::new(QueryRoot {}, MutationRoot {})
}

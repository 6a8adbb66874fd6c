use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use log::warn;

/// Appends an activity-log row. Best effort: audit failures are logged and
/// swallowed so they can never fail the operation being audited.
pub fn record_activity(conn: &PgConnection, username: Option<&str>, action: &str, page: Option<&str>, user_agent: Option<&str>) {
    use crate::schema::activity::dsl;

    let result = diesel::insert_into(dsl::activity)
        .values((
            dsl::username.eq(username),
            dsl::action.eq(action),
            dsl::page.eq(page),
            dsl::user_agent.eq(user_agent.map(truncate_user_agent)),
            dsl::created_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn);

    if let Err(err) = result {
        warn!("failed to record activity {:?}: {}", action, err);
    }
}

fn truncate_user_agent(value: &str) -> &str {
    if value.len() <= 100 {
        return value;
    }
    let mut end = 100;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

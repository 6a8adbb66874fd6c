use chrono::prelude::*;
use diesel::prelude::*;
use log::{debug, warn};
use serde::Serialize;

use crate::AppData;
use crate::contact::ReminderAlert;
use crate::models::{Department, Tank, TankReminder};
use crate::web::errors::ServiceResult;

/// An interval fires when the remaining time is within this many minutes
/// of it, so a sweep running once a minute cannot skip over one.
pub const SWEEP_TOLERANCE_MIN: i64 = 1;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SweepStats {
    pub checked: usize,
    pub sent: usize,
    pub errors: usize,
}

/// Picks the intervals that should fire now, oldest first.
/// `minutes_left` may be negative once the finish instant has passed.
pub fn due_intervals(intervals: &[i32], sent: &[i32], minutes_left: i64) -> Vec<i32> {
    let mut due: Vec<i32> = intervals.iter()
        .copied()
        .filter(|x| !sent.contains(x))
        .filter(|x| (minutes_left - *x as i64).abs() <= SWEEP_TOLERANCE_MIN)
        .collect();
    due.sort_unstable_by(|a, b| b.cmp(a));
    due
}

fn load_active_reminders(ctx: &AppData) -> ServiceResult<Vec<(TankReminder, (Tank, Department))>> {
    use crate::schema::{
        department::dsl as department_dsl,
        tank::dsl as tank_dsl,
        tank_reminder::dsl,
    };

    let conn = ctx.pool.get()?;
    Ok(dsl::tank_reminder
        .filter(dsl::active.eq(true))
        .inner_join(tank_dsl::tank.inner_join(department_dsl::department))
        .load::<(TankReminder, (Tank, Department))>(&conn)?)
}

fn mark_sent(ctx: &AppData, reminder_id: i32, sent: Vec<i32>, deactivate: bool) -> ServiceResult<()> {
    use crate::schema::tank_reminder::dsl;

    let conn = ctx.pool.get()?;
    diesel::update(dsl::tank_reminder.find(reminder_id))
        .set((
            dsl::sent_intervals.eq(sent),
            dsl::last_sent.eq(Some(Utc::now().naive_utc())),
            dsl::active.eq(!deactivate),
        ))
        .execute(&conn)?;
    Ok(())
}

fn mark_error(ctx: &AppData, reminder_id: i32, error: &str) -> ServiceResult<()> {
    use crate::schema::tank_reminder::dsl;

    let conn = ctx.pool.get()?;
    diesel::update(dsl::tank_reminder.find(reminder_id))
        .set(dsl::last_error.eq(Some(error)))
        .execute(&conn)?;
    Ok(())
}

fn deactivate(ctx: &AppData, reminder_id: i32) -> ServiceResult<()> {
    use crate::schema::tank_reminder::dsl;

    let conn = ctx.pool.get()?;
    diesel::update(dsl::tank_reminder.find(reminder_id))
        .set(dsl::active.eq(false))
        .execute(&conn)?;
    Ok(())
}

/// Sweeps every active reminder once: fires intervals whose time has come,
/// deactivates reminders that are past their finish instant or out of
/// intervals. A failing reminder is recorded and skipped, it never stops
/// the sweep.
pub async fn run_sweep(ctx: &AppData) -> ServiceResult<SweepStats> {
    let reminders = load_active_reminders(ctx)?;
    let now = Utc::now().naive_utc();

    let mut stats = SweepStats {
        checked: reminders.len(),
        ..SweepStats::default()
    };

    for (reminder, (tank, department)) in reminders {
        let minutes_left = (reminder.finish_at - now).num_seconds() / 60;

        if minutes_left <= 0 {
            debug!("Reminder {} is past its finish time, deactivating", reminder.id);
            if let Err(err) = deactivate(ctx, reminder.id) {
                warn!("Cannot deactivate reminder {}: {}", reminder.id, err);
                stats.errors += 1;
            }
            continue;
        }

        let due = due_intervals(&reminder.intervals, &reminder.sent_intervals, minutes_left);
        if due.is_empty() {
            continue;
        }

        let conn = match ctx.pool.get() {
            Ok(x) => x,
            Err(err) => {
                warn!("Error in connection pool: {}", err);
                stats.errors += 1;
                continue;
            }
        };

        // Overlapping intervals can all come due in one sweep; every one of
        // them fires now rather than waiting for the next tick.
        let mut sent = reminder.sent_intervals.clone();
        for interval in due {
            let alert = ReminderAlert {
                user_id: reminder.user_id,
                tank_number: tank.number.clone(),
                department_code: department.code.clone(),
                product: tank.product.clone(),
                interval_minutes: interval,
                minutes_remaining: minutes_left,
                phone_number: reminder.phone_number.clone(),
            };

            match ctx.contacter.send_reminder(&conn, &alert).await {
                Ok(()) => {
                    sent.push(interval);
                    let all_sent = sent.len() >= reminder.intervals.len();
                    if let Err(err) = mark_sent(ctx, reminder.id, sent.clone(), all_sent) {
                        warn!("Cannot mark reminder {} as sent: {}", reminder.id, err);
                        stats.errors += 1;
                    } else {
                        stats.sent += 1;
                    }
                }
                Err(err) => {
                    warn!("Cannot deliver reminder {}: {}", reminder.id, err);
                    if let Err(db_err) = mark_error(ctx, reminder.id, &err) {
                        warn!("Cannot record reminder {} error: {}", reminder.id, db_err);
                    }
                    stats.errors += 1;
                }
            }
        }
    }

    Ok(stats)
}

use std::time::{Duration, Instant};

use actix::prelude::*;
use log::{error, info};

use crate::AppData;

use super::controller::run_sweep;

/// Ticks once a minute and sweeps the active reminders.
pub struct ReminderActor {
    pub app_data: AppData,
}

impl ReminderActor {
    fn on_tick(&mut self, ctx: &mut Context<Self>) {
        let start = Instant::now();
        let app_data = self.app_data.clone();

        let task = async move {
            match run_sweep(&app_data).await {
                Ok(stats) => {
                    if stats.checked > 0 {
                        info!(
                            "Reminder sweep: {} checked, {} sent, {} errors in {}ms",
                            stats.checked, stats.sent, stats.errors, start.elapsed().as_millis()
                        );
                    }
                },
                Err(description) => error!("Error during reminder sweep: {}", description),
            }
        };

        ctx.spawn(task.into_actor(self));
    }
}

impl Actor for ReminderActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        info!("starting the reminder actor");

        IntervalFunc::new(Duration::from_millis(60000), Self::on_tick)
            .finish()
            .spawn(ctx);
    }
}

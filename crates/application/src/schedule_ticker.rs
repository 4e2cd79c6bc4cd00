use tracing::info;
use warden_core::{AppResult, RbacProvider};

use crate::role_management_ports::{TickReport, TickerShard};
use crate::schedule_controller::ScheduleController;
use crate::schedule_request_service::ScheduleRequestService;

/// Background pass: materialize, reap, expire and time out pending approvals.
#[derive(Clone)]
pub struct ScheduleTicker {
    controller: ScheduleController,
    requests: ScheduleRequestService,
}

impl ScheduleTicker {
    /// Creates a ticker.
    #[must_use]
    pub fn new(controller: ScheduleController, requests: ScheduleRequestService) -> Self {
        Self {
            controller,
            requests,
        }
    }

    /// Runs one pass for a provider.
    pub async fn run_once(&self, provider: RbacProvider, shard: TickerShard) -> AppResult<TickReport> {
        let mut report = self.controller.tick(provider, shard).await?;
        if shard.index() == 0 {
            report.approvals_timed_out = self.requests.sweep_approval_timeouts(provider).await?;
        }

        if report != TickReport::default() {
            info!(
                provider = %provider,
                shard = shard.index(),
                schedules_scanned = report.schedules_scanned,
                instances_created = report.instances_created,
                instances_reaped = report.instances_reaped,
                schedules_expired = report.schedules_expired,
                approvals_timed_out = report.approvals_timed_out,
                "ticker pass finished"
            );
        }
        Ok(report)
    }

    /// Runs one pass for every provider and sums the reports.
    pub async fn run_all(&self, shard: TickerShard) -> AppResult<TickReport> {
        let mut total = TickReport::default();
        for provider in RbacProvider::all() {
            total.absorb(self.run_once(*provider, shard).await?);
        }

        Ok(total)
    }
}

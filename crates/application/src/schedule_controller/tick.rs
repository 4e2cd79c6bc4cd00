use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};
use warden_core::{AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    AuditAction, RecurrenceRangeType, RequestEvent, RoleSchedule, ScheduleKind, ScheduleStatus,
    materialize,
};

use super::{Batch, ScheduleController};
use crate::role_management_ports::{AssignmentWrite, ScheduleWrite, TickReport, TickerShard};

/// Look-ahead used to decide whether a bounded recurrence has any occurrence left.
const EXHAUSTION_LOOKAHEAD_DAYS: i64 = 3_660;

impl ScheduleController {
    /// One ticker pass over the shard: under each schedule's triple lock, reap its ended
    /// instances, then expire it or re-materialize its rolling horizon.
    pub async fn tick(&self, provider: RbacProvider, shard: TickerShard) -> AppResult<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        for schedule in self.schedules.list_live_schedules(provider).await? {
            if !shard.owns(schedule.id.as_str()) {
                continue;
            }
            report.schedules_scanned += 1;

            if let Err(error) = self.tick_schedule(provider, &schedule, now, &mut report).await {
                warn!(
                    provider = %provider,
                    schedule_id = %schedule.id,
                    error = %error,
                    "ticker skipped schedule"
                );
            }
        }

        Ok(report)
    }

    async fn tick_schedule(
        &self,
        provider: RbacProvider,
        schedule: &RoleSchedule,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> AppResult<()> {
        let _guard = self.lock(provider, &schedule.triple()).await;
        let Some(current) = self
            .schedules
            .find_schedule(provider, schedule.kind, schedule.id.as_str())
            .await?
            .filter(|current| current.status.is_live())
        else {
            return Ok(());
        };

        report.instances_reaped += self
            .schedules
            .delete_instances_ended_by(provider, current.kind, current.id.as_str(), now)
            .await?;
        if has_ended(&current, now) {
            report.schedules_expired += self.expire(provider, current, now).await?;
        } else {
            report.instances_created += self.rematerialize(provider, current, now).await?;
        }

        Ok(())
    }

    /// Expires the schedule and, for eligibilities, every live activation derived from it;
    /// returns how many schedules expired.
    async fn expire(
        &self,
        provider: RbacProvider,
        schedule: RoleSchedule,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut batch = Batch::new(provider, now, CallerIdentity::system().principal_id());
        let cascade = if schedule.kind == ScheduleKind::Eligibility {
            self.lock_activations(&mut batch, &schedule).await?
        } else {
            Vec::new()
        };

        let schedule_id = schedule.id.clone();
        let expired = 1 + cascade.len();
        self.plan_expire(&mut batch, schedule).await?;
        for activation in cascade {
            self.plan_expire(&mut batch, activation).await?;
        }
        self.commit_batch(batch).await?;

        info!(
            provider = %provider,
            schedule_id = %schedule_id,
            expired,
            "schedule expired"
        );
        Ok(u64::try_from(expired).unwrap_or(u64::MAX))
    }

    async fn plan_expire(&self, batch: &mut Batch, mut schedule: RoleSchedule) -> AppResult<()> {
        let before = schedule.status;
        schedule.status = ScheduleStatus::Expired;
        schedule.modified_date_time = batch.now;
        batch.schedule_event(AuditAction::ScheduleExpired, &schedule, before.as_str());
        self.close_origin_request(batch, &schedule, RequestEvent::ExpiryReached)
            .await?;

        if schedule.kind == ScheduleKind::Assignment {
            batch
                .commit
                .assignments
                .push(AssignmentWrite::DeleteForSchedule(schedule.id.clone()));
        }
        batch.commit.schedules.push(ScheduleWrite {
            schedule,
            instances: Some(Vec::new()),
        });

        Ok(())
    }

    /// Rewrites the schedule's instances when the rolling horizon moved; returns how many
    /// new instances were written.
    async fn rematerialize(
        &self,
        provider: RbacProvider,
        schedule: RoleSchedule,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let link = self.activation_link(provider, &schedule).await?;
        let instances = self.instances_for(&schedule, now, link.as_deref());
        let stored: BTreeSet<String> = self
            .schedules
            .list_instances_for_schedule(provider, schedule.kind, schedule.id.as_str())
            .await?
            .into_iter()
            .map(|instance| instance.id)
            .collect();
        let fresh: BTreeSet<String> = instances.iter().map(|instance| instance.id.clone()).collect();
        if fresh == stored {
            return Ok(0);
        }

        let created = fresh.difference(&stored).count();
        let mut batch = Batch::new(provider, now, CallerIdentity::system().principal_id());
        batch.commit.schedules.push(ScheduleWrite {
            schedule,
            instances: Some(instances),
        });
        self.commit_batch(batch).await?;

        Ok(u64::try_from(created).unwrap_or(u64::MAX))
    }
}

fn has_ended(schedule: &RoleSchedule, now: DateTime<Utc>) -> bool {
    let info = &schedule.schedule_info;
    let start = info.start_or(schedule.created_date_time);
    if info.end_from(start).is_some_and(|end| end <= now) {
        return true;
    }

    info.recurrence
        .as_ref()
        .is_some_and(|recurrence| recurrence.range.range_type != RecurrenceRangeType::NoEnd)
        && materialize(info, now, TimeDelta::days(EXHAUSTION_LOOKAHEAD_DAYS)).is_empty()
}

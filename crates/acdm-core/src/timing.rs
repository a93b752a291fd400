//! Evaluation of A-CDM times against their tolerance windows.

use crate::models::{Pilot, TobtState};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

const TSAT_WINDOW_S: i64 = 5 * 60;
const ASAT_WINDOW_S: i64 = 5 * 60;
const ASAT_TAXIOUT_WINDOW_S: i64 = 10 * 60;
const TTOT_BLOCK_MIN: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TsatStatus {
    /// TSAT more than five minutes ahead
    Early { ctot: bool },
    InWindow { ctot: bool },
    /// TSAT passed by more than five minutes
    Late { ctot: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtotStatus {
    Pending,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AsatStatus {
    Valid,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TobtStatus {
    /// TOBT passed together with its TSAT, or more than an hour out
    Expired,
    /// TSAT at least five minutes after an unconfirmed TOBT
    UnconfirmedDelay,
    /// TSAT at least five minutes after a confirmed TOBT
    ConfirmedDelay,
    Confirmed,
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestAge {
    /// Up to five minutes
    Fresh,
    Aging,
    Stale,
    /// Older than fifteen minutes
    Expired,
}

fn seconds_since(time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - time).num_seconds()
}

pub fn tsat_status(pilot: &Pilot, now: DateTime<Utc>) -> Option<TsatStatus> {
    if pilot.asat.is_some() {
        return None;
    }
    let tsat = pilot.tsat?;
    let ctot = pilot.ctot.is_some();
    let since = seconds_since(tsat, now);

    Some(if since < -TSAT_WINDOW_S {
        TsatStatus::Early { ctot }
    } else if since > TSAT_WINDOW_S {
        TsatStatus::Late { ctot }
    } else {
        TsatStatus::InWindow { ctot }
    })
}

/// End of the ten minute block a TTOT falls into.
///
/// A TTOT on a block boundary is its own block end; otherwise the end is the
/// next boundary plus thirty seconds.
pub fn ttot_block_end(ttot: DateTime<Utc>) -> DateTime<Utc> {
    let minutes = ttot.timestamp().div_euclid(60);
    let remaining = TTOT_BLOCK_MIN - minutes.rem_euclid(TTOT_BLOCK_MIN);

    if remaining == TTOT_BLOCK_MIN {
        minute_start(minutes).unwrap_or(ttot)
    } else {
        minute_start(minutes + remaining)
            .map(|rounded| rounded + Duration::seconds(30))
            .unwrap_or(ttot)
    }
}

fn minute_start(minutes: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(minutes * 60, 0).single()
}

pub fn ttot_status(pilot: &Pilot, now: DateTime<Utc>) -> Option<TtotStatus> {
    let ttot = pilot.ttot?;
    if pilot.atot.is_some() {
        return None;
    }
    if now < ttot_block_end(ttot) {
        Some(TtotStatus::Pending)
    } else {
        Some(TtotStatus::Overdue)
    }
}

pub fn asat_status(pilot: &Pilot, now: DateTime<Utc>) -> Option<AsatStatus> {
    let asat = pilot.asat?;
    if pilot.aobt.is_some() {
        return None;
    }

    let window = if pilot.taxizone_is_taxiout {
        ASAT_TAXIOUT_WINDOW_S
    } else {
        ASAT_WINDOW_S
    };
    let around_tsat = pilot.tsat.is_some_and(|tsat| {
        let since = seconds_since(tsat, now);
        (-TSAT_WINDOW_S..=window).contains(&since)
    });
    let recent = seconds_since(asat, now) < window;

    if around_tsat || recent {
        Some(AsatStatus::Valid)
    } else {
        Some(AsatStatus::Overdue)
    }
}

pub fn tobt_status(pilot: &Pilot, now: DateTime<Utc>) -> Option<TobtStatus> {
    let tsat = pilot.tsat?;
    if pilot.asat.is_some() {
        return None;
    }
    let tobt = pilot.tobt?;

    let tobt_passed = seconds_since(tobt, now) > 0;
    let tsat_expired = seconds_since(tsat, now) >= TSAT_WINDOW_S;
    if (tobt_passed && tsat_expired) || tobt >= now + Duration::hours(1) {
        return Some(TobtStatus::Expired);
    }

    let delay = (tsat - tobt).num_seconds();
    let confirmed = pilot.tobt_state == TobtState::Confirmed;
    Some(match (delay >= TSAT_WINDOW_S, confirmed) {
        (true, true) => TobtStatus::ConfirmedDelay,
        (true, false) => TobtStatus::UnconfirmedDelay,
        (false, true) => TobtStatus::Confirmed,
        (false, false) => TobtStatus::Unconfirmed,
    })
}

/// Age of a pending request. `None` when unset or already answered.
pub fn request_age(
    requested: Option<DateTime<Utc>>,
    answered: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<RequestAge> {
    let requested = requested?;
    if answered.is_some() {
        return None;
    }
    let since = seconds_since(requested, now);
    Some(match since {
        s if s <= 5 * 60 => RequestAge::Fresh,
        s if s <= 10 * 60 => RequestAge::Aging,
        s if s <= 15 * 60 => RequestAge::Stale,
        _ => RequestAge::Expired,
    })
}

/// Startup request age, answered by ASAT.
pub fn asrt_age(pilot: &Pilot, now: DateTime<Utc>) -> Option<RequestAge> {
    request_age(pilot.asrt, pilot.asat, now)
}

/// Off-block request age, answered by AOBT.
pub fn aort_age(pilot: &Pilot, now: DateTime<Utc>) -> Option<RequestAge> {
    request_age(pilot.aort, pilot.aobt, now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingSummary {
    pub tobt: Option<TobtStatus>,
    pub tsat: Option<TsatStatus>,
    pub ttot: Option<TtotStatus>,
    pub asat: Option<AsatStatus>,
    pub asrt: Option<RequestAge>,
    pub aort: Option<RequestAge>,
}

pub fn evaluate(pilot: &Pilot, now: DateTime<Utc>) -> TimingSummary {
    TimingSummary {
        tobt: tobt_status(pilot, now),
        tsat: tsat_status(pilot, now),
        ttot: ttot_status(pilot, now),
        asat: asat_status(pilot, now),
        asrt: asrt_age(pilot, now),
        aort: aort_age(pilot, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn pilot() -> Pilot {
        Pilot::new("KLM7", now())
    }

    #[test]
    fn tsat_window_is_five_minutes_each_side() {
        let mut p = pilot();
        assert_eq!(tsat_status(&p, now()), None);

        p.tsat = Some(now() + Duration::minutes(5));
        assert_eq!(tsat_status(&p, now()), Some(TsatStatus::InWindow { ctot: false }));

        p.tsat = Some(now() + Duration::minutes(6));
        assert_eq!(tsat_status(&p, now()), Some(TsatStatus::Early { ctot: false }));

        p.ctot = Some(now() + Duration::minutes(30));
        p.tsat = Some(now() - Duration::minutes(6));
        assert_eq!(tsat_status(&p, now()), Some(TsatStatus::Late { ctot: true }));

        p.asat = Some(now());
        assert_eq!(tsat_status(&p, now()), None);
    }

    #[test]
    fn ttot_rounds_up_to_block_end() {
        let ttot = Utc.with_ymd_and_hms(2024, 6, 1, 10, 13, 20).unwrap();
        assert_eq!(
            ttot_block_end(ttot),
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 30).unwrap()
        );

        let on_boundary = Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 45).unwrap();
        assert_eq!(
            ttot_block_end(on_boundary),
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 0).unwrap()
        );
    }

    #[test]
    fn ttot_becomes_overdue_after_block() {
        let mut p = pilot();
        p.ttot = Some(now() - Duration::minutes(13));
        assert_eq!(ttot_status(&p, now()), Some(TtotStatus::Overdue));

        // 09:57 belongs to the block ending 10:00:30
        p.ttot = Some(now() - Duration::minutes(3));
        assert_eq!(ttot_status(&p, now()), Some(TtotStatus::Pending));

        p.ttot = Some(now() + Duration::minutes(3));
        assert_eq!(ttot_status(&p, now()), Some(TtotStatus::Pending));

        p.atot = Some(now());
        assert_eq!(ttot_status(&p, now()), None);
    }

    #[test]
    fn asat_window_extends_for_taxiout_zones() {
        let mut p = pilot();
        p.asat = Some(now() - Duration::minutes(7));
        assert_eq!(asat_status(&p, now()), Some(AsatStatus::Overdue));

        p.taxizone_is_taxiout = true;
        assert_eq!(asat_status(&p, now()), Some(AsatStatus::Valid));

        p.aobt = Some(now());
        assert_eq!(asat_status(&p, now()), None);
    }

    #[test]
    fn request_age_thresholds() {
        let mut p = pilot();
        p.asrt = Some(now() - Duration::minutes(5));
        assert_eq!(asrt_age(&p, now()), Some(RequestAge::Fresh));
        p.asrt = Some(now() - Duration::minutes(9));
        assert_eq!(asrt_age(&p, now()), Some(RequestAge::Aging));
        p.asrt = Some(now() - Duration::minutes(15));
        assert_eq!(asrt_age(&p, now()), Some(RequestAge::Stale));
        p.asrt = Some(now() - Duration::minutes(16));
        assert_eq!(asrt_age(&p, now()), Some(RequestAge::Expired));

        p.asat = Some(now());
        assert_eq!(asrt_age(&p, now()), None);
        assert_eq!(aort_age(&p, now()), None);
    }

    #[test]
    fn tobt_delay_depends_on_confirmation() {
        let mut p = pilot();
        p.tobt = Some(now() + Duration::minutes(10));
        p.tsat = Some(now() + Duration::minutes(20));
        assert_eq!(tobt_status(&p, now()), Some(TobtStatus::UnconfirmedDelay));

        p.tobt_state = TobtState::Confirmed;
        assert_eq!(tobt_status(&p, now()), Some(TobtStatus::ConfirmedDelay));

        p.tsat = Some(now() + Duration::minutes(12));
        assert_eq!(tobt_status(&p, now()), Some(TobtStatus::Confirmed));

        p.tobt = Some(now() + Duration::hours(2));
        assert_eq!(tobt_status(&p, now()), Some(TobtStatus::Expired));
    }
}

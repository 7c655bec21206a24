use std::collections::{BTreeMap, HashMap, HashSet};

/// Shape of the weekly grid a class schedule is laid out on. Day 1 is
/// Monday. Periods are 1-based; the lunch period is a presentation hint for
/// the shell, slots may still be stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub days: i64,
    pub periods: i64,
}

impl Default for GridShape {
    fn default() -> Self {
        GridShape { days: 5, periods: 8 }
    }
}

pub const DEFAULT_LUNCH_PERIOD: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDef {
    pub day_of_week: i64,
    pub period: i64,
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
}

/// An open offering's subject with the weekly hours its credit buys.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferingCredit {
    pub subject_id: i64,
    pub subject_name: String,
    pub credit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapacityError {
    /// A slot names a subject with no open offering for the class/term.
    UnknownSubject { subject_id: i64 },
    /// A subject is placed into more slots than its credit allows.
    Exceeded {
        subject_name: String,
        used: i64,
        credit: f64,
    },
}

/// Collapse duplicate grid positions: the later entry for the same
/// (day, period) replaces the earlier one. Output in grid order.
pub fn dedupe_last_wins(slots: Vec<SlotDef>) -> Vec<SlotDef> {
    let mut by_pos: BTreeMap<(i64, i64), SlotDef> = BTreeMap::new();
    for s in slots {
        by_pos.insert((s.day_of_week, s.period), s);
    }
    by_pos.into_values().collect()
}

/// First slot falling outside the grid, if any.
pub fn out_of_grid(slots: &[SlotDef], grid: GridShape) -> Option<SlotDef> {
    slots
        .iter()
        .find(|s| {
            s.day_of_week < 1
                || s.day_of_week > grid.days
                || s.period < 1
                || s.period > grid.periods
        })
        .copied()
}

/// Capacity pre-flight for a full-schedule replacement. Every slot must name
/// an open offering, and no subject may occupy more weekly slots than its
/// credit. Equality is allowed; the check is strictly-greater.
pub fn check_capacity(
    slots: &[SlotDef],
    offerings: &[OfferingCredit],
) -> Result<(), CapacityError> {
    let known: HashSet<i64> = offerings.iter().map(|o| o.subject_id).collect();
    for s in slots {
        if !known.contains(&s.subject_id) {
            return Err(CapacityError::UnknownSubject {
                subject_id: s.subject_id,
            });
        }
    }

    let mut hours_by_subject: HashMap<i64, i64> = HashMap::new();
    for s in slots {
        *hours_by_subject.entry(s.subject_id).or_insert(0) += 1;
    }

    for o in offerings {
        let used = hours_by_subject.get(&o.subject_id).copied().unwrap_or(0);
        if used as f64 > o.credit {
            return Err(CapacityError::Exceeded {
                subject_name: o.subject_name.clone(),
                used,
                credit: o.credit,
            });
        }
    }
    Ok(())
}

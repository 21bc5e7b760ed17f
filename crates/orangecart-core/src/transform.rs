//! Derivation of a later board revision's pin table from an earlier one.

use log::trace;

use crate::{
    OrangeCartError,
    io::{Constraint, IoEntry, IoStandard, Subsignal},
};

/// Closed lookup from one IO standard to another. Anything outside the
/// domain is an error, never a pass-through.
#[derive(Debug, Clone, Copy)]
pub struct StandardMap(pub &'static [(IoStandard, IoStandard)]);

impl StandardMap {
    pub fn get(&self, std: IoStandard) -> Result<IoStandard, OrangeCartError> {
        self.0
            .iter()
            .find(|(from, _)| *from == std)
            .map(|(_, to)| *to)
            .ok_or(OrangeCartError::UnmappedIoStandard(std))
    }
}

/// Substitutes every IO standard in `entries`, recursing into subsignals.
/// Entry order and subsignal order are preserved.
pub fn map_standards(
    entries: &[IoEntry],
    map: &StandardMap,
) -> Result<Vec<IoEntry>, OrangeCartError> {
    entries
        .iter()
        .map(|entry| {
            Ok(IoEntry {
                name: entry.name.clone(),
                index: entry.index,
                constraints: map_constraints(&entry.constraints, map)?,
            })
        })
        .collect()
}

fn map_constraints(
    constraints: &[Constraint],
    map: &StandardMap,
) -> Result<Vec<Constraint>, OrangeCartError> {
    constraints
        .iter()
        .map(|constraint| {
            Ok(match constraint {
                Constraint::Standard(std) => Constraint::Standard(map.get(*std)?),
                Constraint::Subsignal(sub) => Constraint::Subsignal(Subsignal {
                    name: sub.name.clone(),
                    constraints: map_constraints(&sub.constraints, map)?,
                }),
                other => other.clone(),
            })
        })
        .collect()
}

/// A subsignal added by a revision, placed right after `after`.
#[derive(Debug, Clone, Copy)]
pub struct SubsignalInsertion {
    pub after: &'static str,
    pub name: &'static str,
    pub pads: &'static str,
}

impl SubsignalInsertion {
    fn subsignal(&self) -> Subsignal {
        Subsignal::new(self.name, vec![Constraint::pins(self.pads)])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RevisionTransform {
    pub standards: StandardMap,
    /// Name of the entry receiving `insertions`
    pub target: &'static str,
    pub insertions: &'static [SubsignalInsertion],
}

impl RevisionTransform {
    pub fn apply(&self, base: &[IoEntry]) -> Result<Vec<IoEntry>, OrangeCartError> {
        let mut entries = map_standards(base, &self.standards)?;

        let mut found = false;
        for entry in entries.iter_mut().filter(|e| e.name == self.target) {
            found = true;
            for insertion in self.insertions {
                insert_subsignal(entry, insertion)?;
            }
        }

        if !found {
            return Err(OrangeCartError::MissingResource {
                name: self.target.to_string(),
            });
        }

        Ok(entries)
    }
}

fn insert_subsignal(
    entry: &mut IoEntry,
    insertion: &SubsignalInsertion,
) -> Result<(), OrangeCartError> {
    if entry.subsignal(insertion.name).is_some() {
        return Err(OrangeCartError::DuplicateSubsignal {
            entry: entry.name.clone(),
            subsignal: insertion.name.to_string(),
        });
    }

    let position = entry
        .constraints
        .iter()
        .position(|c| matches!(c, Constraint::Subsignal(sub) if sub.name == insertion.after))
        .ok_or_else(|| OrangeCartError::MissingSubsignal {
            entry: entry.name.clone(),
            subsignal: insertion.after.to_string(),
        })?;

    trace!(
        "Inserting {}.{} after {}",
        entry.name,
        insertion.name,
        insertion.after
    );

    entry
        .constraints
        .insert(position + 1, Constraint::Subsignal(insertion.subsignal()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoStandard::*;

    const MAP: StandardMap = StandardMap(&[
        (LVCMOS18, LVCMOS33),
        (SSTL18D_II, LVCMOS33D),
        (LVCMOS33, LVCMOS33),
        (LVCMOS33D, LVCMOS33D),
    ]);

    const TRANSFORM: RevisionTransform = RevisionTransform {
        standards: MAP,
        target: "port",
        insertions: &[
            SubsignalInsertion {
                after: "a",
                name: "a2",
                pads: "X1",
            },
            SubsignalInsertion {
                after: "b",
                name: "b2",
                pads: "X2",
            },
        ],
    };

    fn sample() -> Vec<IoEntry> {
        vec![
            IoEntry::new(
                "ram",
                0,
                vec![
                    Subsignal::new("dq", vec![Constraint::pins("A1 A2"), LVCMOS18.into()]).into(),
                    Subsignal::new("ck_p", vec![Constraint::pins("A3"), SSTL18D_II.into()]).into(),
                    Constraint::misc("SLEWRATE=FAST"),
                ],
            ),
            IoEntry::new(
                "port",
                0,
                vec![
                    Subsignal::new("a", vec![Constraint::pins("B1")]).into(),
                    Subsignal::new("b", vec![Constraint::pins("B2")]).into(),
                    LVCMOS33.into(),
                ],
            ),
            IoEntry::new("btn", 0, vec![Constraint::pins("C1"), LVCMOS18.into()]),
        ]
    }

    #[test]
    fn substitutes_nested_standards_in_place() {
        let mapped = map_standards(&sample(), &MAP).unwrap();
        let ram = &mapped[0];
        assert_eq!(
            ram.subsignal("dq").unwrap().constraints,
            vec![Constraint::pins("A1 A2"), LVCMOS33.into()]
        );
        assert_eq!(
            ram.subsignal("ck_p").unwrap().constraints,
            vec![Constraint::pins("A3"), LVCMOS33D.into()]
        );
        assert_eq!(ram.constraints[2], Constraint::misc("SLEWRATE=FAST"));
        assert_eq!(mapped[2].constraints[1], LVCMOS33.into());
    }

    #[test]
    fn substitution_is_idempotent_on_fixed_points() {
        let once = map_standards(&sample(), &MAP).unwrap();
        let twice = map_standards(&once, &MAP).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unmapped_standard_fails() {
        let entries = vec![IoEntry::new("diff", 0, vec![Constraint::pins("D1"), LVDS.into()])];
        assert!(matches!(
            map_standards(&entries, &MAP),
            Err(OrangeCartError::UnmappedIoStandard(LVDS))
        ));

        let nested = vec![IoEntry::new(
            "diff",
            0,
            vec![Subsignal::new("p", vec![Constraint::pins("D1"), SSTL135_I.into()]).into()],
        )];
        assert!(matches!(
            map_standards(&nested, &MAP),
            Err(OrangeCartError::UnmappedIoStandard(SSTL135_I))
        ));
    }

    #[test]
    fn inserts_after_anchors() {
        let derived = TRANSFORM.apply(&sample()).unwrap();
        let names: Vec<_> = derived[1].subsignals().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "a2", "b", "b2"]);
        assert_eq!(
            derived[1].subsignal("b2").unwrap().constraints,
            vec![Constraint::pins("X2")]
        );

        let keys: Vec<_> = derived.iter().map(|e| e.key()).collect();
        assert_eq!(keys, [("ram", 0), ("port", 0), ("btn", 0)]);
    }

    #[test]
    fn applying_twice_is_rejected() {
        let derived = TRANSFORM.apply(&sample()).unwrap();
        assert!(matches!(
            TRANSFORM.apply(&derived),
            Err(OrangeCartError::DuplicateSubsignal { .. })
        ));
    }

    #[test]
    fn missing_target_or_anchor_fails() {
        let without_port: Vec<_> = sample().into_iter().filter(|e| e.name != "port").collect();
        assert!(matches!(
            TRANSFORM.apply(&without_port),
            Err(OrangeCartError::MissingResource { .. })
        ));

        let mut without_anchor = sample();
        without_anchor[1].constraints.remove(1);
        assert!(matches!(
            TRANSFORM.apply(&without_anchor),
            Err(OrangeCartError::MissingSubsignal { ref subsignal, .. }) if subsignal == "b"
        ));
    }
}

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Department/cohort label used to spread students apart when mixing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Explicit(String),
    Ungrouped,
}

impl GroupKey {
    /// Blank labels land in the same bucket as missing ones.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(s) if !s.is_empty() => GroupKey::Explicit(s.to_string()),
            _ => GroupKey::Ungrouped,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            GroupKey::Explicit(s) => Some(s.as_str()),
            GroupKey::Ungrouped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub roll_number: String,
    pub name: String,
    pub group: GroupKey,
}

impl Student {
    pub fn new(id: i64, group: Option<&str>) -> Self {
        Self {
            id,
            roll_number: String::new(),
            name: String::new(),
            group: GroupKey::from_label(group),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: i64,
    pub room_number: String,
    pub capacity: i64,
    pub rows: Option<i64>,
    pub columns: Option<i64>,
}

impl Room {
    pub fn new(id: i64, capacity: i64, rows: Option<i64>, columns: Option<i64>) -> Self {
        Self {
            id,
            room_number: String::new(),
            capacity,
            rows,
            columns,
        }
    }

    /// Sittable seats; negative capacity counts as none.
    pub fn seat_count(&self) -> usize {
        usize::try_from(self.capacity).unwrap_or(0)
    }

    /// Column count of a usable grid. Both dimensions must be positive.
    /// `rows * columns` is never checked against `capacity`: logical grids
    /// may be larger or smaller than the physical seat count.
    pub fn grid_columns(&self) -> Option<i64> {
        match (self.rows, self.columns) {
            (Some(r), Some(c)) if r > 0 && c > 0 => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatingAllocation {
    pub student_id: i64,
    pub room_id: i64,
    pub seat_number: i64,
    pub row_number: Option<i64>,
    pub column_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("student {student_id} appears more than once in the roster")]
    DuplicateStudent { student_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeatingPlan {
    pub allocations: Vec<SeatingAllocation>,
    pub student_count: usize,
    pub seat_capacity: usize,
}

impl SeatingPlan {
    pub fn unallocated(&self) -> usize {
        self.student_count.saturating_sub(self.allocations.len())
    }

    pub fn is_complete(&self) -> bool {
        self.unallocated() == 0
    }

    /// Ids of roster entries that did not get a seat, in roster order.
    pub fn unallocated_ids(&self, students: &[Student]) -> Vec<i64> {
        let seated: HashSet<i64> = self.allocations.iter().map(|a| a.student_id).collect();
        students
            .iter()
            .map(|s| s.id)
            .filter(|id| !seated.contains(id))
            .collect()
    }
}

/// Saturates at `usize::MAX` instead of overflowing.
pub fn total_capacity(rooms: &[Room]) -> usize {
    rooms
        .iter()
        .map(Room::seat_count)
        .fold(0usize, usize::saturating_add)
}

/// Largest rooms first; equal capacities keep their input order.
pub fn order_rooms(rooms: &[Room]) -> Vec<&Room> {
    let mut ordered: Vec<&Room> = rooms.iter().collect();
    ordered.sort_by_key(|r| Reverse(r.seat_count()));
    ordered
}

/// Round-robin over groups in first-seen order, one member per group per round.
pub fn interleave_by_group(students: &[Student]) -> Vec<&Student> {
    let mut index: HashMap<&GroupKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Student>> = Vec::new();
    for s in students {
        let slot = *index.entry(&s.group).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(s);
    }

    let rounds = groups.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(students.len());
    for i in 0..rounds {
        for g in &groups {
            if let Some(s) = g.get(i) {
                out.push(*s);
            }
        }
    }
    out
}

/// Row-major (row, column), both 1-based.
pub fn seat_position(seat_number: i64, columns: i64) -> (i64, i64) {
    let idx = seat_number - 1;
    (idx / columns + 1, idx % columns + 1)
}

/// Maps students onto room seats.
///
/// With `mix_groups` the order is the deterministic group interleave; without
/// it the roster is shuffled with `rng`. Rooms are filled largest first, seat
/// by seat, until either side runs out. A short result means capacity ran out
/// before the roster did; that is not an error here.
pub fn allocate<R>(
    students: &[Student],
    rooms: &[Room],
    mix_groups: bool,
    rng: &mut R,
) -> Vec<SeatingAllocation>
where
    R: Rng + ?Sized,
{
    let ordered_students: Vec<&Student> = if mix_groups {
        interleave_by_group(students)
    } else {
        let mut v: Vec<&Student> = students.iter().collect();
        v.shuffle(rng);
        v
    };

    let mut out = Vec::with_capacity(ordered_students.len());
    let mut next = ordered_students.into_iter();

    'rooms: for room in order_rooms(rooms) {
        let columns = room.grid_columns();
        for seat in 1..=room.capacity.max(0) {
            let Some(student) = next.next() else {
                break 'rooms;
            };
            let (row_number, column_number) = match columns {
                Some(c) => {
                    let (r, c) = seat_position(seat, c);
                    (Some(r), Some(c))
                }
                None => (None, None),
            };
            out.push(SeatingAllocation {
                student_id: student.id,
                room_id: room.id,
                seat_number: seat,
                row_number,
                column_number,
            });
        }
    }
    out
}

/// Same as [`allocate`] but refuses rosters with repeated student ids.
pub fn allocate_checked<R>(
    students: &[Student],
    rooms: &[Room],
    mix_groups: bool,
    rng: &mut R,
) -> Result<SeatingPlan, AllocError>
where
    R: Rng + ?Sized,
{
    let mut seen = HashSet::with_capacity(students.len());
    for s in students {
        if !seen.insert(s.id) {
            return Err(AllocError::DuplicateStudent { student_id: s.id });
        }
    }

    Ok(SeatingPlan {
        allocations: allocate(students, rooms, mix_groups, rng),
        student_count: students.len(),
        seat_capacity: total_capacity(rooms),
    })
}

/// SHA-256 over one canonical line per allocation, in output order.
pub fn allocation_digest(allocations: &[SeatingAllocation]) -> String {
    let mut hasher = Sha256::new();
    for a in allocations {
        let line = format!(
            "{},{},{},{},{}\n",
            a.student_id,
            a.room_id,
            a.seat_number,
            a.row_number.map(|v| v.to_string()).unwrap_or_default(),
            a.column_number.map(|v| v.to_string()).unwrap_or_default(),
        );
        hasher.update(line.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn interleave_worked_example() {
        let students = vec![
            Student::new(1, Some("CS")),
            Student::new(2, Some("CS")),
            Student::new(3, Some("EE")),
            Student::new(4, Some("CS")),
            Student::new(5, Some("EE")),
        ];
        let rooms = vec![Room::new(10, 3, Some(1), Some(3))];

        let out = allocate(&students, &rooms, true, &mut rng());
        assert_eq!(
            out,
            vec![
                SeatingAllocation {
                    student_id: 1,
                    room_id: 10,
                    seat_number: 1,
                    row_number: Some(1),
                    column_number: Some(1),
                },
                SeatingAllocation {
                    student_id: 3,
                    room_id: 10,
                    seat_number: 2,
                    row_number: Some(1),
                    column_number: Some(2),
                },
                SeatingAllocation {
                    student_id: 2,
                    room_id: 10,
                    seat_number: 3,
                    row_number: Some(1),
                    column_number: Some(3),
                },
            ]
        );
    }

    #[test]
    fn empty_roster_or_rooms_yield_nothing() {
        let rooms = vec![Room::new(1, 30, None, None)];
        assert!(allocate(&[], &rooms, true, &mut rng()).is_empty());
        assert!(allocate(&[], &rooms, false, &mut rng()).is_empty());

        let students = vec![Student::new(1, None)];
        assert!(allocate(&students, &[], true, &mut rng()).is_empty());
    }

    #[test]
    fn flat_room_has_no_grid_position() {
        let students: Vec<Student> = (1..=4).map(|i| Student::new(i, None)).collect();
        let rooms = vec![Room::new(9, 4, None, None)];
        let out = allocate(&students, &rooms, true, &mut rng());
        assert_eq!(out.len(), 4);
        assert!(out
            .iter()
            .all(|a| a.row_number.is_none() && a.column_number.is_none()));
    }

    #[test]
    fn half_declared_layout_counts_as_flat() {
        let students: Vec<Student> = (1..=3).map(|i| Student::new(i, None)).collect();
        let rooms = vec![
            Room::new(1, 1, Some(2), None),
            Room::new(2, 1, Some(0), Some(4)),
            Room::new(3, 1, None, Some(4)),
        ];
        let out = allocate(&students, &rooms, true, &mut rng());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|a| a.row_number.is_none()));
    }

    #[test]
    fn largest_room_fills_first_and_ties_keep_input_order() {
        let students: Vec<Student> = (1..=7).map(|i| Student::new(i, None)).collect();
        let rooms = vec![
            Room::new(1, 2, None, None),
            Room::new(2, 3, None, None),
            Room::new(3, 2, None, None),
        ];
        let out = allocate(&students, &rooms, true, &mut rng());
        let room_order: Vec<i64> = out.iter().map(|a| a.room_id).collect();
        assert_eq!(room_order, vec![2, 2, 2, 1, 1, 3, 3]);
    }

    #[test]
    fn negative_and_zero_capacity_rooms_are_skipped() {
        let students: Vec<Student> = (1..=2).map(|i| Student::new(i, None)).collect();
        let rooms = vec![
            Room::new(1, -5, None, None),
            Room::new(2, 0, Some(2), Some(2)),
            Room::new(3, 1, None, None),
        ];
        let out = allocate(&students, &rooms, true, &mut rng());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].room_id, 3);
        assert_eq!(total_capacity(&rooms), 1);
    }

    #[test]
    fn seats_past_declared_grid_still_get_positions() {
        let students: Vec<Student> = (1..=5).map(|i| Student::new(i, None)).collect();
        let rooms = vec![Room::new(1, 5, Some(1), Some(2))];
        let out = allocate(&students, &rooms, true, &mut rng());
        let last = out.last().expect("five seats");
        assert_eq!(last.seat_number, 5);
        assert_eq!((last.row_number, last.column_number), (Some(3), Some(1)));
    }

    #[test]
    fn blank_department_joins_ungrouped_bucket() {
        assert_eq!(GroupKey::from_label(Some("  ")), GroupKey::Ungrouped);
        assert_eq!(GroupKey::from_label(None), GroupKey::Ungrouped);
        assert_eq!(
            GroupKey::from_label(Some(" EE ")),
            GroupKey::Explicit("EE".into())
        );

        let students = vec![
            Student::new(1, None),
            Student::new(2, Some("")),
            Student::new(3, Some("ME")),
        ];
        let order: Vec<i64> = interleave_by_group(&students).iter().map(|s| s.id).collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let students: Vec<Student> = (1..=40).map(|i| Student::new(i, None)).collect();
        let rooms = vec![Room::new(1, 40, Some(5), Some(8))];
        let a = allocate(&students, &rooms, false, &mut StdRng::seed_from_u64(99));
        let b = allocate(&students, &rooms, false, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
        assert_eq!(allocation_digest(&a), allocation_digest(&b));
    }

    #[test]
    fn different_seeds_give_different_orders() {
        let students: Vec<Student> = (1..=40).map(|i| Student::new(i, None)).collect();
        let rooms = vec![Room::new(1, 40, None, None)];
        let ids = |seed: u64| -> Vec<i64> {
            allocate(&students, &rooms, false, &mut StdRng::seed_from_u64(seed))
                .iter()
                .map(|a| a.student_id)
                .collect()
        };
        let input: Vec<i64> = (1..=40).collect();
        assert_ne!(ids(1), ids(2));
        assert_ne!(ids(1), input);
    }

    #[test]
    fn huge_capacities_saturate_instead_of_overflowing() {
        let rooms = vec![
            Room::new(1, i64::MAX, None, None),
            Room::new(2, i64::MAX, None, None),
            Room::new(3, i64::MAX, None, None),
        ];
        assert_eq!(total_capacity(&rooms), usize::MAX);

        let students = vec![Student::new(1, None), Student::new(2, Some("CS"))];
        let plan = allocate_checked(&students, &rooms, true, &mut rng()).expect("plan");
        assert_eq!(plan.allocations.len(), 2);
        assert!(plan.allocations.iter().all(|a| a.room_id == 1));
        assert!(plan.is_complete());
    }

    #[test]
    fn checked_rejects_duplicate_ids() {
        let students = vec![Student::new(4, None), Student::new(4, Some("CS"))];
        let rooms = vec![Room::new(1, 10, None, None)];
        let e = allocate_checked(&students, &rooms, true, &mut rng()).unwrap_err();
        assert_eq!(e, AllocError::DuplicateStudent { student_id: 4 });
    }

    #[test]
    fn plan_reports_shortfall() {
        let students: Vec<Student> = (1..=5).map(|i| Student::new(i, Some("CS"))).collect();
        let rooms = vec![Room::new(1, 3, None, None)];
        let plan = allocate_checked(&students, &rooms, true, &mut rng()).expect("plan");
        assert_eq!(plan.seat_capacity, 3);
        assert_eq!(plan.unallocated(), 2);
        assert!(!plan.is_complete());
        assert_eq!(plan.unallocated_ids(&students), vec![4, 5]);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = allocation_digest(&[]);
        assert_eq!(
            d,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Hadir,
    Sakit,
    Izin,
    Alfa,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hadir" => Some(Self::Hadir),
            "sakit" => Some(Self::Sakit),
            "izin" => Some(Self::Izin),
            "alfa" => Some(Self::Alfa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hadir => "hadir",
            Self::Sakit => "sakit",
            Self::Izin => "izin",
            Self::Alfa => "alfa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradeType {
    Harian,
    Uts,
    Uas,
}

impl GradeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "harian" => Some(Self::Harian),
            "uts" => Some(Self::Uts),
            "uas" => Some(Self::Uas),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Harian => "harian",
            Self::Uts => "uts",
            Self::Uas => "uas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semester {
    Ganjil,
    Genap,
}

impl Semester {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ganjil" => Some(Self::Ganjil),
            "genap" => Some(Self::Genap),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ganjil => "ganjil",
            Self::Genap => "genap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentStatus {
    Active,
    Inactive,
    Graduated,
}

impl StudentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "graduated" => Some(Self::Graduated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Graduated => "graduated",
        }
    }
}

/// Half-away-from-zero rounding to 2 decimal places, applied to every
/// reported average and final score.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Letter thresholds are inclusive at the lower bound and compare the
/// already-rounded score: 89.995 rounds to 90.00 and earns an A.
pub fn letter_grade(score: f64) -> &'static str {
    let s = round2(score);
    if s >= 90.0 {
        "A"
    } else if s >= 80.0 {
        "B"
    } else if s >= 70.0 {
        "C"
    } else if s >= 60.0 {
        "D"
    } else {
        "E"
    }
}

/// An active-roster entry, the unit both aggregators iterate over.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub nis: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub hadir: i64,
    pub sakit: i64,
    pub izin: i64,
    pub alfa: i64,
}

impl AttendanceTally {
    pub fn record(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Hadir => self.hadir += 1,
            AttendanceStatus::Sakit => self.sakit += 1,
            AttendanceStatus::Izin => self.izin += 1,
            AttendanceStatus::Alfa => self.alfa += 1,
        }
    }

    pub fn total(self) -> i64 {
        self.hadir + self.sakit + self.izin + self.alfa
    }

    /// Present percentage over all recorded days; 0 when nothing is recorded.
    pub fn percent(self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        round2(100.0 * self.hadir as f64 / total as f64)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRow {
    pub student_id: String,
    pub nis: String,
    pub name: String,
    pub hadir: i64,
    pub sakit: i64,
    pub izin: i64,
    pub alfa: i64,
    pub total: i64,
    pub percent: f64,
}

/// Per-student status counts over a window. Every roster student gets a row;
/// students with no records come back all-zero. Records for ids outside the
/// roster (inactive or transferred students) are dropped.
pub fn attendance_statistics<I>(roster: &[RosterStudent], records: I) -> Vec<StudentAttendanceRow>
where
    I: IntoIterator<Item = (String, AttendanceStatus)>,
{
    let mut tallies: HashMap<String, AttendanceTally> = HashMap::new();
    for (student_id, status) in records {
        tallies.entry(student_id).or_default().record(status);
    }

    roster
        .iter()
        .map(|s| {
            let t = tallies.get(&s.id).copied().unwrap_or_default();
            StudentAttendanceRow {
                student_id: s.id.clone(),
                nis: s.nis.clone(),
                name: s.name.clone(),
                hadir: t.hadir,
                sakit: t.sakit,
                izin: t.izin,
                alfa: t.alfa,
                total: t.total(),
                percent: t.percent(),
            }
        })
        .collect()
}

/// Average of a score bucket; the empty bucket averages to 0 so the final
/// arithmetic stays total.
pub fn type_average(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRow {
    pub student_id: String,
    pub nis: String,
    pub name: String,
    pub harian: f64,
    pub uts: f64,
    pub uas: f64,
    pub harian_count: usize,
    pub uts_count: usize,
    pub uas_count: usize,
    #[serde(rename = "final")]
    pub final_score: f64,
    pub grade_letter: String,
}

/// Per-student semester summary: per-type averages, the equally-weighted
/// final, and the letter. Per-type counts ride along so a consumer can tell
/// "no grades recorded" (count 0, average 0) apart from recorded zeros.
pub fn grade_summaries<I>(roster: &[RosterStudent], records: I) -> Vec<StudentGradeRow>
where
    I: IntoIterator<Item = (String, GradeType, f64)>,
{
    let mut buckets: HashMap<(String, GradeType), Vec<f64>> = HashMap::new();
    for (student_id, grade_type, score) in records {
        buckets.entry((student_id, grade_type)).or_default().push(score);
    }

    roster
        .iter()
        .map(|s| {
            let bucket = |t: GradeType| -> &[f64] {
                buckets
                    .get(&(s.id.clone(), t))
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
            };
            let harian = bucket(GradeType::Harian);
            let uts = bucket(GradeType::Uts);
            let uas = bucket(GradeType::Uas);

            let harian_avg = type_average(harian);
            let uts_avg = type_average(uts);
            let uas_avg = type_average(uas);
            let final_score = (harian_avg + uts_avg + uas_avg) / 3.0;

            StudentGradeRow {
                student_id: s.id.clone(),
                nis: s.nis.clone(),
                name: s.name.clone(),
                harian: round2(harian_avg),
                uts: round2(uts_avg),
                uas: round2(uas_avg),
                harian_count: harian.len(),
                uts_count: uts.len(),
                uas_count: uas.len(),
                final_score: round2(final_score),
                grade_letter: letter_grade(final_score).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_of(names: &[(&str, &str, &str)]) -> Vec<RosterStudent> {
        names
            .iter()
            .map(|(id, nis, name)| RosterStudent {
                id: id.to_string(),
                nis: nis.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn letter_thresholds_inclusive_at_lower_bound() {
        assert_eq!(letter_grade(100.0), "A");
        assert_eq!(letter_grade(90.0), "A");
        assert_eq!(letter_grade(89.99), "B");
        assert_eq!(letter_grade(80.0), "B");
        assert_eq!(letter_grade(79.99), "C");
        assert_eq!(letter_grade(70.0), "C");
        assert_eq!(letter_grade(69.99), "D");
        assert_eq!(letter_grade(60.0), "D");
        assert_eq!(letter_grade(59.99), "E");
        assert_eq!(letter_grade(0.0), "E");
    }

    #[test]
    fn letter_uses_rounded_score() {
        // 89.996 rounds to 90.00 before the comparison.
        assert_eq!(letter_grade(89.996), "A");
        assert_eq!(letter_grade(89.994), "B");
    }

    #[test]
    fn final_is_mean_of_three_type_averages() {
        let roster = roster_of(&[("s1", "1001", "Andi")]);
        let records = vec![
            ("s1".to_string(), GradeType::Harian, 80.0),
            ("s1".to_string(), GradeType::Harian, 90.0),
            ("s1".to_string(), GradeType::Uts, 70.0),
        ];
        let rows = grade_summaries(&roster, records);
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.harian, 85.0);
        assert_eq!(r.uts, 70.0);
        assert_eq!(r.uas, 0.0);
        assert_eq!(r.uas_count, 0);
        assert_eq!(r.final_score, 51.67);
        assert_eq!(r.grade_letter, "E");
    }

    #[test]
    fn zero_grades_yields_zero_final_with_zero_counts() {
        let roster = roster_of(&[("s1", "1001", "Andi")]);
        let rows = grade_summaries(&roster, Vec::new());
        let r = &rows[0];
        assert_eq!(r.final_score, 0.0);
        assert_eq!(r.grade_letter, "E");
        assert_eq!((r.harian_count, r.uts_count, r.uas_count), (0, 0, 0));
    }

    #[test]
    fn attendance_percent_18_of_20_is_90() {
        let mut t = AttendanceTally::default();
        for _ in 0..18 {
            t.record(AttendanceStatus::Hadir);
        }
        t.record(AttendanceStatus::Sakit);
        t.record(AttendanceStatus::Alfa);
        assert_eq!(t.total(), 20);
        assert_eq!(t.percent(), 90.0);
    }

    #[test]
    fn attendance_percent_zero_total_is_zero() {
        assert_eq!(AttendanceTally::default().percent(), 0.0);
    }

    #[test]
    fn attendance_statistics_zero_roster_is_empty() {
        let rows = attendance_statistics(
            &[],
            vec![("ghost".to_string(), AttendanceStatus::Hadir)],
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn attendance_statistics_absent_student_gets_zero_row() {
        let roster = roster_of(&[("s1", "1001", "Andi"), ("s2", "1002", "Budi")]);
        let records = vec![
            ("s1".to_string(), AttendanceStatus::Hadir),
            ("s1".to_string(), AttendanceStatus::Izin),
        ];
        let rows = attendance_statistics(&roster, records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hadir, 1);
        assert_eq!(rows[0].izin, 1);
        assert_eq!(rows[0].total, 2);
        assert_eq!(rows[1].total, 0);
        assert_eq!(rows[1].percent, 0.0);
    }

    #[test]
    fn round2_half_away_from_zero() {
        assert_eq!(round2(51.6666666), 51.67);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn status_tokens_round_trip() {
        for s in ["hadir", "sakit", "izin", "alfa"] {
            assert_eq!(AttendanceStatus::parse(s).map(|v| v.as_str()), Some(s));
        }
        assert!(AttendanceStatus::parse("present").is_none());
        for t in ["harian", "uts", "uas"] {
            assert_eq!(GradeType::parse(t).map(|v| v.as_str()), Some(t));
        }
        assert!(GradeType::parse("quiz").is_none());
    }
}

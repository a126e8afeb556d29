use crate::calc::{self, GradeType, Semester};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    assignment_json, get_required_str, load_assignment, now_rfc3339, require_owner, roster_json,
    Assignment, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const NOTES_MAX_CHARS: usize = 255;
const SAVE_MAX_ENTRIES: usize = 500;

fn parse_grade_type(raw: &str) -> Result<GradeType, HandlerErr> {
    GradeType::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("type must be one of: harian, uts, uas")
            .with_details(json!({ "type": raw }))
    })
}

fn parse_semester(raw: &str) -> Result<Semester, HandlerErr> {
    Semester::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("semester must be one of: ganjil, genap")
            .with_details(json!({ "semester": raw }))
    })
}

fn optional_grade_type(params: &serde_json::Value) -> Result<GradeType, HandlerErr> {
    match params.get("type").and_then(|v| v.as_str()) {
        Some(raw) => parse_grade_type(raw),
        None => Ok(GradeType::Harian),
    }
}

fn optional_semester(params: &serde_json::Value) -> Result<Semester, HandlerErr> {
    match params.get("semester").and_then(|v| v.as_str()) {
        Some(raw) => parse_semester(raw),
        None => Ok(Semester::Ganjil),
    }
}

struct SaveEntry {
    student_id: String,
    score: f64,
    notes: Option<String>,
}

/// Whole-batch validation before any write; score range and class membership
/// failures reject the complete request.
fn validate_entries(
    conn: &Connection,
    assignment: &Assignment,
    raw: &[serde_json::Value],
) -> Result<Vec<SaveEntry>, HandlerErr> {
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }
    if raw.len() > SAVE_MAX_ENTRIES {
        return Err(HandlerErr::bad_params("too many entries").with_details(json!({
            "entries": raw.len(),
            "max": SAVE_MAX_ENTRIES
        })));
    }

    let mut entries = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return Err(HandlerErr::bad_params(format!("entry at index {} must be an object", i)));
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params(format!("entry at index {} missing studentId", i)));
        };
        let Some(score) = obj.get("score").and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::bad_params(format!(
                "entry at index {} missing numeric score",
                i
            )));
        };
        if !(0.0..=100.0).contains(&score) {
            return Err(HandlerErr::bad_params(format!(
                "entry at index {}: score must be between 0 and 100",
                i
            ))
            .with_details(json!({ "score": score })));
        }
        let notes = match obj.get("notes") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(HandlerErr::bad_params(format!(
                        "entry at index {}: notes must be string or null",
                        i
                    )));
                };
                if s.chars().count() > NOTES_MAX_CHARS {
                    return Err(HandlerErr::bad_params(format!(
                        "entry at index {}: notes exceed {} characters",
                        i, NOTES_MAX_CHARS
                    )));
                }
                Some(s.to_string())
            }
        };

        let class_id: Option<String> = conn
            .query_row(
                "SELECT class_id FROM students WHERE id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        match class_id {
            None => {
                return Err(HandlerErr::bad_params(format!(
                    "entry at index {}: student not found",
                    i
                ))
                .with_details(json!({ "studentId": student_id })))
            }
            Some(cid) if cid != assignment.class_id => {
                return Err(HandlerErr::bad_params(format!(
                    "entry at index {}: student is not in the assignment's class",
                    i
                ))
                .with_details(json!({ "studentId": student_id })))
            }
            Some(_) => {}
        }

        entries.push(SaveEntry {
            student_id: student_id.to_string(),
            score,
            notes,
        });
    }
    Ok(entries)
}

fn grades_sheet_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let grade_type = optional_grade_type(params)?;
    let semester = optional_semester(params)?;

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;

    let roster = crate::ipc::helpers::active_roster(conn, &assignment.class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, score, notes
             FROM grades
             WHERE class_id = ? AND subject_id = ? AND teacher_id = ?
               AND type = ? AND semester = ? AND academic_year = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                &assignment.class_id,
                &assignment.subject_id,
                &assignment.teacher_id,
                grade_type.as_str(),
                semester.as_str(),
                &assignment.academic_year
            ],
            |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "score": r.get::<_, f64>(1)?,
                    "notes": r.get::<_, Option<String>>(2)?
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "assignment": assignment_json(&assignment),
        "gradeType": grade_type.as_str(),
        "semester": semester.as_str(),
        "students": roster_json(&roster),
        "rows": rows
    }))
}

fn grades_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let grade_type = parse_grade_type(&get_required_str(params, "type")?)?;
    let semester = parse_semester(&get_required_str(params, "semester")?)?;
    let Some(raw_entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;
    let entries = validate_entries(conn, &assignment, raw_entries)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let now = now_rfc3339();
    for entry in &entries {
        let record_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO grades(
                id, student_id, subject_id, class_id, teacher_id,
                type, score, academic_year, semester, notes, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, class_id, teacher_id,
                         type, academic_year, semester) DO UPDATE SET
               score = excluded.score,
               notes = excluded.notes,
               updated_at = excluded.updated_at",
            rusqlite::params![
                &record_id,
                &entry.student_id,
                &assignment.subject_id,
                &assignment.class_id,
                &assignment.teacher_id,
                grade_type.as_str(),
                entry.score,
                &assignment.academic_year,
                semester.as_str(),
                &entry.notes,
                &now,
                &now
            ],
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grades" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "saved": entries.len() }))
}

fn grades_recap(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let semester = optional_semester(params)?;

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;

    let roster = crate::ipc::helpers::active_roster(conn, &assignment.class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, type, score
             FROM grades
             WHERE class_id = ? AND subject_id = ? AND teacher_id = ?
               AND semester = ? AND academic_year = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let records: Vec<(String, String, f64)> = stmt
        .query_map(
            rusqlite::params![
                &assignment.class_id,
                &assignment.subject_id,
                &assignment.teacher_id,
                semester.as_str(),
                &assignment.academic_year
            ],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let summary = calc::grade_summaries(
        &roster,
        records
            .into_iter()
            .filter_map(|(student_id, t, score)| GradeType::parse(&t).map(|t| (student_id, t, score))),
    );
    let summary = serde_json::to_value(summary).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "assignment": assignment_json(&assignment),
        "semester": semester.as_str(),
        "summary": summary
    }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.sheetOpen" => Some(dispatch(state, req, grades_sheet_open)),
        "grades.save" => Some(dispatch(state, req, grades_save)),
        "grades.recap" => Some(dispatch(state, req, grades_recap)),
        _ => None,
    }
}

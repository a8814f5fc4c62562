use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Seating,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "seating" => Some(Self::Seating),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Seating => "setup.seating",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Seating => json!({
            "defaultMixGroups": true,
            "allowPartial": true,
            "defaultStudentScope": "cohort"
        }),
        SetupSection::Reports => json!({
            "showGeneratedAt": true,
            "roomOrder": "roomNumber"
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentScope {
    Cohort,
    All,
}

impl StudentScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cohort" => Some(Self::Cohort),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cohort => "cohort",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOrder {
    RoomNumber,
    Allocation,
}

#[derive(Debug, Clone, Copy)]
pub struct SeatingSettings {
    pub default_mix_groups: bool,
    pub allow_partial: bool,
    pub default_student_scope: StudentScope,
}

#[derive(Debug, Clone, Copy)]
pub struct ReportSettings {
    pub show_generated_at: bool,
    pub room_order: RoomOrder,
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_choice(v: &Value, key: &str, choices: &[&str]) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim();
    choices
        .iter()
        .find(|c| c.eq_ignore_ascii_case(s))
        .map(|c| c.to_string())
        .ok_or_else(|| format!("{} must be one of: {}", key, choices.join(", ")))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Seating => match k.as_str() {
                "defaultMixGroups" | "allowPartial" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultStudentScope" => {
                    obj.insert(
                        k.clone(),
                        Value::String(parse_choice(v, k, &["cohort", "all"])?),
                    );
                }
                _ => return Err(format!("unknown seating field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "roomOrder" => {
                    obj.insert(
                        k.clone(),
                        Value::String(parse_choice(v, k, &["roomNumber", "allocation"])?),
                    );
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

pub fn load_seating_settings(conn: &rusqlite::Connection) -> anyhow::Result<SeatingSettings> {
    let v = load_section(conn, SetupSection::Seating)?;
    Ok(SeatingSettings {
        default_mix_groups: v["defaultMixGroups"].as_bool().unwrap_or(true),
        allow_partial: v["allowPartial"].as_bool().unwrap_or(true),
        default_student_scope: v["defaultStudentScope"]
            .as_str()
            .and_then(StudentScope::parse)
            .unwrap_or(StudentScope::Cohort),
    })
}

pub fn load_report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    Ok(ReportSettings {
        show_generated_at: v["showGeneratedAt"].as_bool().unwrap_or(true),
        room_order: match v["roomOrder"].as_str() {
            Some("allocation") => RoomOrder::Allocation,
            _ => RoomOrder::RoomNumber,
        },
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let seating = match load_section(conn, SetupSection::Seating) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "seating": seating, "reports": reports }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

use crate::models::db_operations::DbError;
use crate::models::{Group, GroupFilter, InstitutionKind, NewGroup, ReferenceEntity};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Lookup tables readable through the reference API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    InstitutionTypes,
    Cities,
    Specialities,
    EducationForms,
    AdmissionYears,
    SchoolClasses,
    Categories,
}

impl ReferenceTable {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "institution-types" => Some(ReferenceTable::InstitutionTypes),
            "cities" => Some(ReferenceTable::Cities),
            "specialities" => Some(ReferenceTable::Specialities),
            "education-forms" => Some(ReferenceTable::EducationForms),
            "admission-years" => Some(ReferenceTable::AdmissionYears),
            "school-classes" => Some(ReferenceTable::SchoolClasses),
            "categories" => Some(ReferenceTable::Categories),
            _ => None,
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            ReferenceTable::InstitutionTypes => "institution_types",
            ReferenceTable::Cities => "cities",
            ReferenceTable::Specialities => "specialities",
            ReferenceTable::EducationForms => "education_forms",
            ReferenceTable::AdmissionYears => "admission_years",
            ReferenceTable::SchoolClasses => "school_classes",
            ReferenceTable::Categories => "categories",
        }
    }

    /// Projection onto (id, name, code, institution_type_id).
    fn select_sql(self) -> &'static str {
        match self {
            ReferenceTable::InstitutionTypes => "SELECT id, name, kind, NULL FROM institution_types ORDER BY name",
            ReferenceTable::Cities => "SELECT id, name, NULL, NULL FROM cities ORDER BY name",
            ReferenceTable::Specialities => "SELECT id, name, code, institution_type_id FROM specialities ORDER BY code, name",
            ReferenceTable::EducationForms => "SELECT id, name, NULL, institution_type_id FROM education_forms ORDER BY name",
            ReferenceTable::AdmissionYears => {
                "SELECT id, CAST(year AS TEXT), description, institution_type_id FROM admission_years WHERE is_active = 1 ORDER BY year DESC"
            }
            ReferenceTable::SchoolClasses => "SELECT id, name, NULL, institution_type_id FROM school_classes ORDER BY name",
            ReferenceTable::Categories => "SELECT id, name, NULL, NULL FROM categories ORDER BY name",
        }
    }
}

pub fn list_reference(conn: &Connection, table: ReferenceTable) -> Result<Vec<ReferenceEntity>, DbError> {
    let mut stmt = conn.prepare(table.select_sql())?;
    let rows = stmt.query_map([], |row| {
        Ok(ReferenceEntity {
            id: row.get(0)?,
            name: row.get(1)?,
            code: row.get(2)?,
            institution_type_id: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn reference_exists(conn: &Connection, table: ReferenceTable, id: i64) -> Result<bool, DbError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table.table_name());
    Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
}

pub fn read_institution_kind(conn: &Connection, institution_type_id: i64) -> Result<Option<InstitutionKind>, DbError> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM institution_types WHERE id = ?1",
            [institution_type_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(kind.as_deref().and_then(InstitutionKind::parse))
}

pub fn city_name_exists(conn: &Connection, name: &str) -> Result<bool, DbError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM cities WHERE name = ?1 COLLATE NOCASE)",
        [name],
        |row| row.get(0),
    )?)
}

pub fn insert_city(conn: &Connection, name: &str) -> Result<i64, DbError> {
    conn.execute("INSERT INTO cities (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

const GROUP_COLUMNS: &str = "g.id, g.display_name, g.institution_type_id, g.speciality_id, g.education_form_id, \
     g.admission_year_id, g.school_class_id, g.city_id";

fn map_group_row(row: &Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        display_name: row.get(1)?,
        institution_type_id: row.get(2)?,
        speciality_id: row.get(3)?,
        education_form_id: row.get(4)?,
        admission_year_id: row.get(5)?,
        school_class_id: row.get(6)?,
        city_id: row.get(7)?,
    })
}

pub fn read_group(conn: &Connection, group_id: i64) -> Result<Option<Group>, DbError> {
    let sql = format!("SELECT {} FROM student_groups g WHERE g.id = ?1", GROUP_COLUMNS);
    Ok(conn.query_row(&sql, [group_id], map_group_row).optional()?)
}

pub fn list_groups(conn: &Connection, filter: &GroupFilter) -> Result<Vec<Group>, DbError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let exact = [
        ("g.institution_type_id", filter.institution_type_id),
        ("g.speciality_id", filter.speciality_id),
        ("g.education_form_id", filter.education_form_id),
        ("g.admission_year_id", filter.admission_year_id),
        ("g.city_id", filter.city_id),
    ];
    for (column, value) in exact {
        if let Some(value) = value {
            clauses.push(format!("{} = ?", column));
            values.push(Value::Integer(value));
        }
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("(g.display_name LIKE ? OR s.code LIKE ? OR s.name LIKE ?)".to_string());
        let pattern = format!("%{}%", search);
        values.extend(std::iter::repeat(Value::Text(pattern)).take(3));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM student_groups g LEFT JOIN specialities s ON s.id = g.speciality_id{} ORDER BY g.display_name ASC",
        GROUP_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_group_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn group_name_exists(conn: &Connection, display_name: &str) -> Result<bool, DbError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM student_groups WHERE display_name = ?1)",
        [display_name],
        |row| row.get(0),
    )?)
}

pub fn insert_group(conn: &Connection, group: &NewGroup) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO student_groups (display_name, institution_type_id, speciality_id, education_form_id,
                             admission_year_id, school_class_id, city_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            group.display_name,
            group.institution_type_id,
            group.speciality_id,
            group.education_form_id,
            group.admission_year_id,
            group.school_class_id,
            group.city_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_group(conn: &Connection, group_id: i64) -> Result<usize, DbError> {
    Ok(conn.execute("DELETE FROM student_groups WHERE id = ?1", [group_id])?)
}

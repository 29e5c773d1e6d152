use crate::error::AppError;
use crate::helper::authz;
use crate::models::audience::{BASE_CLASSES, MAX_COURSE};
use crate::models::db_operations::reference_db_operations::{self, ReferenceTable};
use crate::models::{Actor, Group, GroupFilter, InstitutionKind, NewGroup, ReferenceEntity};
use crate::DbPool;

pub const DEFAULT_MAX_COURSE: i64 = 4;

pub fn list_reference(pool: &DbPool, slug: &str) -> Result<Vec<ReferenceEntity>, AppError> {
    let table = ReferenceTable::from_slug(slug)
        .ok_or_else(|| AppError::not_found(format!("Unknown reference list '{}'.", slug)))?;
    let conn = pool.get()?;
    Ok(reference_db_operations::list_reference(&conn, table)?)
}

pub fn list_groups(pool: &DbPool, filter: &GroupFilter) -> Result<Vec<Group>, AppError> {
    let conn = pool.get()?;
    Ok(reference_db_operations::list_groups(&conn, filter)?)
}

pub fn read_group(pool: &DbPool, group_id: i64) -> Result<Group, AppError> {
    let conn = pool.get()?;
    reference_db_operations::read_group(&conn, group_id)?
        .ok_or_else(|| AppError::not_found(format!("Group {} not found.", group_id)))
}

/// Courses `1..=max`, clamped to the supported range.
pub fn course_options(max: Option<i64>) -> Vec<i64> {
    let max = max.unwrap_or(DEFAULT_MAX_COURSE).clamp(1, MAX_COURSE);
    (1..=max).collect()
}

pub fn base_class_options() -> Vec<i64> {
    BASE_CLASSES.to_vec()
}

/// School groups carry a class and nothing college-like; college and university
/// groups carry an education form plus a speciality or an admission year.
pub fn validate_group_shape(kind: InstitutionKind, group: &NewGroup) -> Result<(), AppError> {
    match kind {
        InstitutionKind::School => {
            if group.school_class_id.is_none() {
                return Err(AppError::validation("School groups require a school class."));
            }
            if group.speciality_id.is_some() || group.education_form_id.is_some() || group.admission_year_id.is_some() {
                return Err(AppError::validation(
                    "School groups cannot have a speciality, education form or admission year.",
                ));
            }
        }
        InstitutionKind::College | InstitutionKind::University => {
            if group.education_form_id.is_none() {
                return Err(AppError::validation("This group requires an education form."));
            }
            if group.speciality_id.is_none() && group.admission_year_id.is_none() {
                return Err(AppError::validation("This group requires a speciality or an admission year."));
            }
        }
    }
    Ok(())
}

pub fn create_city(pool: &DbPool, actor: &Actor, name: &str) -> Result<ReferenceEntity, AppError> {
    authz::can_manage_reference_data(actor).into_result()?;
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("City name is required."));
    }

    let conn = pool.get()?;
    if reference_db_operations::city_name_exists(&conn, name)? {
        return Err(AppError::Conflict(format!("City '{}' already exists.", name)));
    }
    let id = reference_db_operations::insert_city(&conn, name)?;
    log::info!("Admin {} created city {} ({})", actor.user_id, id, name);
    Ok(ReferenceEntity { id, name: name.to_string(), code: None, institution_type_id: None })
}

pub fn create_group(pool: &DbPool, actor: &Actor, mut group: NewGroup) -> Result<Group, AppError> {
    authz::can_manage_reference_data(actor).into_result()?;
    group.display_name = group.display_name.trim().to_string();
    if group.display_name.is_empty() {
        return Err(AppError::validation("Group name is required."));
    }

    let conn = pool.get()?;
    let kind = reference_db_operations::read_institution_kind(&conn, group.institution_type_id)?.ok_or_else(|| {
        AppError::not_found(format!("Institution type {} not found.", group.institution_type_id))
    })?;

    let references = [
        (ReferenceTable::Specialities, group.speciality_id, "Speciality"),
        (ReferenceTable::EducationForms, group.education_form_id, "Education form"),
        (ReferenceTable::AdmissionYears, group.admission_year_id, "Admission year"),
        (ReferenceTable::SchoolClasses, group.school_class_id, "School class"),
        (ReferenceTable::Cities, group.city_id, "City"),
    ];
    for (table, id, label) in references {
        if let Some(id) = id {
            if !reference_db_operations::reference_exists(&conn, table, id)? {
                return Err(AppError::not_found(format!("{} {} not found.", label, id)));
            }
        }
    }

    validate_group_shape(kind, &group)?;

    if reference_db_operations::group_name_exists(&conn, &group.display_name)? {
        return Err(AppError::Conflict(format!("Group '{}' already exists.", group.display_name)));
    }
    let id = reference_db_operations::insert_group(&conn, &group)?;
    log::info!("Admin {} created group {} ({})", actor.user_id, id, group.display_name);

    reference_db_operations::read_group(&conn, id)?
        .ok_or_else(|| AppError::not_found(format!("Group {} not found.", id)))
}

pub fn delete_group(pool: &DbPool, actor: &Actor, group_id: i64) -> Result<(), AppError> {
    authz::can_manage_reference_data(actor).into_result()?;
    let conn = pool.get()?;
    if reference_db_operations::delete_group(&conn, group_id)? == 0 {
        return Err(AppError::not_found(format!("Group {} not found.", group_id)));
    }
    log::info!("Admin {} deleted group {}", actor.user_id, group_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool;
    use crate::models::Role;

    const ADMIN: Actor = Actor { user_id: 1, role: Role::Admin };
    const EDITOR: Actor = Actor { user_id: 2, role: Role::Editor };

    fn seeded_pool() -> DbPool {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "INSERT INTO institution_types (name, kind) VALUES ('Школа', 'school'), ('Колледж', 'college');
             INSERT INTO school_classes (name, institution_type_id) VALUES ('10Б', 1);
             INSERT INTO education_forms (name, institution_type_id) VALUES ('Очная', 2);
             INSERT INTO specialities (code, name, institution_type_id) VALUES ('09.02.07', 'ИС', 2);
             INSERT INTO cities (name) VALUES ('Москва');",
        )
        .unwrap();
        drop(conn);
        pool
    }

    fn school_group(name: &str) -> NewGroup {
        NewGroup {
            display_name: name.into(),
            institution_type_id: 1,
            speciality_id: None,
            education_form_id: None,
            admission_year_id: None,
            school_class_id: Some(1),
            city_id: Some(1),
        }
    }

    fn college_group(name: &str) -> NewGroup {
        NewGroup {
            display_name: name.into(),
            institution_type_id: 2,
            speciality_id: Some(1),
            education_form_id: Some(1),
            admission_year_id: None,
            school_class_id: None,
            city_id: None,
        }
    }

    #[test]
    fn group_shape_rules() {
        assert!(validate_group_shape(InstitutionKind::School, &school_group("10Б")).is_ok());
        assert!(validate_group_shape(InstitutionKind::College, &college_group("ИС-21")).is_ok());

        let mut mixed = school_group("10Б");
        mixed.speciality_id = Some(1);
        assert!(validate_group_shape(InstitutionKind::School, &mixed).is_err());

        let mut no_form = college_group("ИС-21");
        no_form.education_form_id = None;
        assert!(validate_group_shape(InstitutionKind::University, &no_form).is_err());

        let mut only_form = college_group("ИС-21");
        only_form.speciality_id = None;
        assert!(validate_group_shape(InstitutionKind::College, &only_form).is_err());
    }

    #[test]
    fn duplicate_city_is_a_conflict() {
        let pool = seeded_pool();
        assert!(matches!(create_city(&pool, &ADMIN, " Москва "), Err(AppError::Conflict(_))));
        let city = create_city(&pool, &ADMIN, "Казань").unwrap();
        assert_eq!(city.name, "Казань");
    }

    #[test]
    fn only_admins_write_reference_data() {
        let pool = seeded_pool();
        assert!(matches!(create_city(&pool, &EDITOR, "Казань"), Err(AppError::Authorization(_))));
        assert!(matches!(create_group(&pool, &EDITOR, school_group("10Б")), Err(AppError::Authorization(_))));
    }

    #[test]
    fn group_creation_checks_references_shape_and_uniqueness() {
        let pool = seeded_pool();
        let created = create_group(&pool, &ADMIN, college_group("ИС-21")).unwrap();
        assert_eq!(created.education_form_id, Some(1));

        assert!(matches!(create_group(&pool, &ADMIN, college_group("ИС-21")), Err(AppError::Conflict(_))));

        let mut missing_city = school_group("10Б");
        missing_city.city_id = Some(99);
        assert!(matches!(create_group(&pool, &ADMIN, missing_city), Err(AppError::NotFound(_))));

        let mut bad_type = school_group("11А");
        bad_type.institution_type_id = 42;
        assert!(matches!(create_group(&pool, &ADMIN, bad_type), Err(AppError::NotFound(_))));

        let mut wrong_shape = college_group("ИС-22");
        wrong_shape.school_class_id = None;
        wrong_shape.speciality_id = None;
        assert!(matches!(create_group(&pool, &ADMIN, wrong_shape), Err(AppError::Validation(_))));
    }

    #[test]
    fn deleting_a_group_twice_is_not_found() {
        let pool = seeded_pool();
        let group = create_group(&pool, &ADMIN, school_group("10Б")).unwrap();
        delete_group(&pool, &ADMIN, group.id).unwrap();
        assert!(matches!(delete_group(&pool, &ADMIN, group.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn course_options_are_clamped() {
        assert_eq!(course_options(None), vec![1, 2, 3, 4]);
        assert_eq!(course_options(Some(2)), vec![1, 2]);
        assert_eq!(course_options(Some(40)), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(course_options(Some(0)), vec![1]);
    }

    #[test]
    fn unknown_reference_slug_is_not_found() {
        let pool = seeded_pool();
        assert!(matches!(list_reference(&pool, "planets"), Err(AppError::NotFound(_))));
        assert_eq!(list_reference(&pool, "cities").unwrap().len(), 1);
        assert_eq!(list_reference(&pool, "institution-types").unwrap().len(), 2);
    }
}

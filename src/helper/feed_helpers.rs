use rusqlite::Connection;
use serde::Serialize;

use crate::error::AppError;
use crate::helper::audience_matcher::{descriptor_matches, CoarsePredicate};
use crate::models::audience::{AudienceKind, Dimension, StudentContext};
use crate::models::db_operations::{articles_db_operations, reference_db_operations};
use crate::models::{Actor, Article, ArticleListFilter, ContextQuery, Group, Page, Pagination};
use crate::DbPool;

/// Dimension values a group stands for.
pub fn context_from_group(group: &Group) -> StudentContext {
    let mut context = StudentContext::default().with(Dimension::InstitutionType, [group.institution_type_id]);
    let optional = [
        (Dimension::Speciality, group.speciality_id),
        (Dimension::EducationForm, group.education_form_id),
        (Dimension::AdmissionYear, group.admission_year_id),
        (Dimension::SchoolClass, group.school_class_id),
        (Dimension::City, group.city_id),
    ];
    for (dim, value) in optional {
        context.values_mut(dim).extend(value);
    }
    context
}

/// Starts from the group (if any), then lets explicit values replace a dimension.
/// An unknown group id is a NotFound; missing dimensions stay empty.
pub fn resolve_context(conn: &Connection, query: &ContextQuery) -> Result<StudentContext, AppError> {
    let mut context = match query.group_id {
        Some(group_id) => {
            let group = reference_db_operations::read_group(conn, group_id)?
                .ok_or_else(|| AppError::not_found(format!("Group {} not found.", group_id)))?;
            context_from_group(&group)
        }
        None => StudentContext::default(),
    };

    for (dim, values) in query.explicit_values() {
        if !values.is_empty() {
            *context.values_mut(dim) = values.into_iter().collect();
        }
    }
    Ok(context)
}

/// Slices one page out of an already filtered and ordered list.
pub fn paginate<T: Serialize>(items: Vec<T>, page: u32, per_page: u32) -> Page<T> {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let total = items.len() as u64;
    let offset = (page as usize - 1).saturating_mul(per_page as usize);

    let articles: Vec<T> = items.into_iter().skip(offset).take(per_page as usize).collect();
    Page { articles, pagination: Pagination::new(page, per_page, total) }
}

/// Published, student-facing articles visible to `context`, newest first.
pub fn feed_for_context(conn: &Connection, context: &StudentContext) -> Result<Vec<Article>, AppError> {
    let (clause, params) = CoarsePredicate::for_context(context).to_sql();
    let candidates = articles_db_operations::read_feed_candidates(conn, &clause, &params)?;
    let candidate_count = candidates.len();

    let visible: Vec<Article> = candidates
        .into_iter()
        .filter(|article| descriptor_matches(context, &article.audience))
        .collect();
    log::debug!("Feed: {} coarse candidates, {} visible.", candidate_count, visible.len());
    Ok(visible)
}

pub fn resolve_feed(pool: &DbPool, query: &ContextQuery, page: u32, per_page: u32) -> Result<Page<Article>, AppError> {
    let conn = pool.get()?;
    let context = resolve_context(&conn, query)?;
    let visible = feed_for_context(&conn, &context)?;
    Ok(paginate(visible, page, per_page))
}

/// Non-staff callers only ever see published, student-facing articles.
pub fn restrict_for_viewer(mut filter: ArticleListFilter, viewer: Option<&Actor>) -> ArticleListFilter {
    if !viewer.map_or(false, |actor| actor.role.is_staff()) {
        filter.is_published = Some(true);
        filter.is_for_staff = Some(false);
    }
    filter
}

/// General article listing. Column filters go to SQL; an audience context or a
/// `view` kind switches to in-process filtering with manual slicing.
pub fn list_articles(
    pool: &DbPool,
    filter: &ArticleListFilter,
    context_query: &ContextQuery,
    view: Option<AudienceKind>,
    page: u32,
    per_page: u32,
) -> Result<Page<Article>, AppError> {
    let conn = pool.get()?;

    if !context_query.has_any_dimension() && view.is_none() {
        let total = articles_db_operations::count_articles(&conn, filter)?;
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        let articles = articles_db_operations::query_articles(&conn, filter, Some((per_page, offset)))?;
        return Ok(Page { articles, pagination: Pagination::new(page.max(1), per_page, total) });
    }

    let context = if context_query.has_any_dimension() {
        Some(resolve_context(&conn, context_query)?)
    } else {
        None
    };

    let rows = articles_db_operations::query_articles(&conn, filter, None)?;
    let selected: Vec<Article> = rows
        .into_iter()
        .filter(|article| view.map_or(true, |kind| article.audience.kind() == Some(kind)))
        .filter(|article| context.as_ref().map_or(true, |ctx| descriptor_matches(ctx, &article.audience)))
        .collect();
    Ok(paginate(selected, page, per_page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::article_helpers::{self, ArticlePayload};
    use crate::memory_pool;
    use crate::models::audience::{AudienceDescriptor, LegacyAudience, PublishScope, Rule};
    use crate::models::db_operations::reference_db_operations::insert_group;
    use crate::models::db_operations::users_db_operations;
    use crate::models::{NewArticle, NewGroup, Role};
    use chrono::{Duration, Utc};

    fn insert_plain(conn: &Connection, title: &str, audience: AudienceDescriptor, offset_secs: i64) -> i64 {
        let article = NewArticle {
            title: title.to_string(),
            content: "<p>Body</p>".to_string(),
            is_published: true,
            is_for_staff: false,
            is_actual: true,
            tag: None,
            audience,
        };
        let at = Utc::now() + Duration::seconds(offset_secs);
        articles_db_operations::insert_article(conn, &article, &at).unwrap()
    }

    fn seed_college_group(conn: &Connection) -> i64 {
        conn.execute("INSERT INTO institution_types (name, kind) VALUES ('Колледж', 'college')", []).unwrap();
        conn.execute("INSERT INTO cities (name) VALUES ('Москва')", []).unwrap();
        conn.execute("INSERT INTO education_forms (name, institution_type_id) VALUES ('Очная', 1)", []).unwrap();
        conn.execute("INSERT INTO specialities (code, name, institution_type_id) VALUES ('09.02.07', 'ИС', 1)", []).unwrap();
        insert_group(
            conn,
            &NewGroup {
                display_name: "ИС-21".to_string(),
                institution_type_id: 1,
                speciality_id: Some(1),
                education_form_id: Some(1),
                admission_year_id: None,
                school_class_id: None,
                city_id: Some(1),
            },
        )
        .unwrap()
    }

    #[test]
    fn pages_slice_the_filtered_set() {
        let pool = memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            for i in 0..25 {
                insert_plain(&conn, &format!("Article {}", i), AudienceDescriptor::general(), i);
            }
        }

        let query = ContextQuery { course: Some(1), ..Default::default() };
        let mut sizes = Vec::new();
        let mut next = Vec::new();
        let mut prev = Vec::new();
        for page in 1..=3 {
            let result = resolve_feed(&pool, &query, page, 10).unwrap();
            assert_eq!(result.pagination.total, 25);
            assert_eq!(result.pagination.pages, 3);
            sizes.push(result.articles.len());
            next.push(result.pagination.has_next);
            prev.push(result.pagination.has_prev);
        }
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(next, vec![true, true, false]);
        assert_eq!(prev, vec![false, true, true]);
    }

    #[test]
    fn feed_is_newest_first_with_id_tie_break() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let older = insert_plain(&conn, "Older", AudienceDescriptor::general(), -60);
        let same_a = insert_plain(&conn, "Same A", AudienceDescriptor::general(), 0);
        let now = Utc::now();
        let b = NewArticle {
            title: "Same B".into(),
            content: "x".into(),
            is_published: true,
            is_for_staff: false,
            is_actual: true,
            tag: None,
            audience: AudienceDescriptor::general(),
        };
        // Two rows sharing one timestamp.
        let same_b = articles_db_operations::insert_article(&conn, &b, &now).unwrap();
        let same_c = articles_db_operations::insert_article(&conn, &b, &now).unwrap();

        let ids: Vec<i64> = feed_for_context(&conn, &StudentContext::default())
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids.first(), Some(&same_c));
        assert_eq!(ids[1], same_b);
        assert!(ids.iter().position(|&id| id == older) > ids.iter().position(|&id| id == same_a));
    }

    #[test]
    fn publish_for_all_reaches_every_context() {
        let pool = memory_pool().unwrap();
        let group_id = {
            let conn = pool.get().unwrap();
            let group_id = seed_college_group(&conn);
            let author = users_db_operations::create_user(&conn, "ed@example.com", "secret", Role::Editor, None).unwrap();
            let payload = ArticlePayload {
                title: "Welcome week".into(),
                content: "<p>Schedule</p>".into(),
                is_published: Some(true),
                publish_scope: Some(PublishScope::for_all()),
                ..Default::default()
            };
            drop(conn);
            article_helpers::create_articles(&pool, &Actor { user_id: author, role: Role::Editor }, payload).unwrap();
            group_id
        };

        let queries = [
            ContextQuery::default(),
            ContextQuery { group_id: Some(group_id), ..Default::default() },
            ContextQuery { city_id: Some(99), course: Some(4), ..Default::default() },
        ];
        for query in &queries {
            let page = resolve_feed(&pool, query, 1, 10).unwrap();
            assert_eq!(page.articles.len(), 1, "{:?}", query);
        }
    }

    fn seed_editor_and_cities(pool: &DbPool, cities: &[&str]) -> Actor {
        let conn = pool.get().unwrap();
        for name in cities {
            conn.execute("INSERT INTO cities (name) VALUES (?1)", [name]).unwrap();
        }
        let user_id = users_db_operations::create_user(&conn, "ed@example.com", "secret", Role::Editor, None).unwrap();
        Actor { user_id, role: Role::Editor }
    }

    #[test]
    fn rules_list_targets_two_cities() {
        let pool = memory_pool().unwrap();
        let editor = seed_editor_and_cities(&pool, &["Москва", "Казань", "Томск"]);
        let payload = ArticlePayload {
            title: "City news".into(),
            content: "<p>Openings</p>".into(),
            is_published: Some(true),
            publish_scope: Some(PublishScope::with_rules(vec![
                Rule::wildcard().with(Dimension::City, [1]),
                Rule::wildcard().with(Dimension::City, [2]),
            ])),
            ..Default::default()
        };
        article_helpers::create_articles(&pool, &editor, payload).unwrap();

        for (city, expected) in [(1, 1), (2, 1), (3, 0)] {
            let query = ContextQuery { city_id: Some(city), ..Default::default() };
            assert_eq!(resolve_feed(&pool, &query, 1, 10).unwrap().articles.len(), expected, "city {}", city);
        }
    }

    #[test]
    fn split_rules_are_narrowed_before_the_fine_filter() {
        let pool = memory_pool().unwrap();
        let editor = seed_editor_and_cities(&pool, &["Москва", "Казань", "Томск"]);
        let payload = ArticlePayload {
            title: "City news".into(),
            content: "<p>Openings</p>".into(),
            is_published: Some(true),
            publish_scope: Some(PublishScope::with_rules(vec![
                Rule::wildcard().with(Dimension::City, [1]),
                Rule::wildcard().with(Dimension::City, [2]),
            ])),
            split_by_combination: true,
            ..Default::default()
        };
        let created = article_helpers::create_articles(&pool, &editor, payload).unwrap();
        assert_eq!(created.article_ids.len(), 2);

        let conn = pool.get().unwrap();
        let outsider = StudentContext::default().with(Dimension::City, [3]);
        let (clause, params) = CoarsePredicate::for_context(&outsider).to_sql();
        assert!(articles_db_operations::read_feed_candidates(&conn, &clause, &params).unwrap().is_empty());

        let local = StudentContext::default().with(Dimension::City, [2]);
        let ids: Vec<i64> = feed_for_context(&conn, &local).unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![created.article_ids[1]]);
    }

    #[test]
    fn group_course_feed_uses_legacy_course_columns() {
        let pool = memory_pool().unwrap();
        let (group_id, first, second, all) = {
            let conn = pool.get().unwrap();
            let group_id = seed_college_group(&conn);
            let course = |c| {
                AudienceDescriptor::Legacy(LegacyAudience {
                    audience: Some(AudienceKind::Course),
                    course: Some(c),
                    ..Default::default()
                })
            };
            let first = insert_plain(&conn, "First years", course(1), 0);
            let second = insert_plain(&conn, "Second years", course(2), 1);
            let all = insert_plain(
                &conn,
                "Everyone",
                AudienceDescriptor::Legacy(LegacyAudience { audience: Some(AudienceKind::All), ..Default::default() }),
                2,
            );
            (group_id, first, second, all)
        };

        let query = ContextQuery { group_id: Some(group_id), course: Some(1), ..Default::default() };
        let ids: Vec<i64> = resolve_feed(&pool, &query, 1, 10).unwrap().articles.into_iter().map(|a| a.id).collect();
        assert!(ids.contains(&first));
        assert!(!ids.contains(&second));
        assert!(ids.contains(&all));
    }

    #[test]
    fn unknown_group_is_not_found() {
        let pool = memory_pool().unwrap();
        let query = ContextQuery { group_id: Some(404), ..Default::default() };
        assert!(matches!(resolve_feed(&pool, &query, 1, 10), Err(AppError::NotFound(_))));
    }

    #[test]
    fn explicit_values_override_group_dimensions() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let group_id = seed_college_group(&conn);
        let query = ContextQuery { group_id: Some(group_id), city_id: Some(5), ..Default::default() };
        let context = resolve_context(&conn, &query).unwrap();
        assert_eq!(context.values(Dimension::City).iter().copied().collect::<Vec<_>>(), vec![5]);
        assert!(context.values(Dimension::Speciality).contains(&1));
        assert!(context.values(Dimension::Course).is_empty());
    }

    #[test]
    fn staff_and_archived_articles_stay_out_of_the_feed() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let visible = insert_plain(&conn, "Visible", AudienceDescriptor::general(), 0);
        let staff = insert_plain(&conn, "Staff only", AudienceDescriptor::general(), 1);
        let archived = insert_plain(&conn, "Archived", AudienceDescriptor::general(), 2);
        conn.execute("UPDATE articles SET is_for_staff = 1 WHERE id = ?1", [staff]).unwrap();
        conn.execute("UPDATE articles SET archived_at = '2024-01-01T00:00:00.000000Z' WHERE id = ?1", [archived]).unwrap();

        let ids: Vec<i64> = feed_for_context(&conn, &StudentContext::default()).unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![visible]);
    }

    #[test]
    fn listing_view_filters_by_coarse_kind() {
        let pool = memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute("INSERT INTO cities (name) VALUES ('Москва')", []).unwrap();
            insert_plain(&conn, "General", AudienceDescriptor::general(), 0);
            insert_plain(&conn, "Moscow", AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [1])]), 1);
        }
        let filter = restrict_for_viewer(ArticleListFilter::default(), None);
        let page = list_articles(&pool, &filter, &ContextQuery::default(), Some(AudienceKind::City), 1, 10).unwrap();
        assert_eq!(page.articles.len(), 1);
        assert_eq!(page.articles[0].title, "Moscow");

        let all = list_articles(&pool, &filter, &ContextQuery::default(), None, 1, 10).unwrap();
        assert_eq!(all.pagination.total, 2);
    }

    #[test]
    fn listing_filters_by_category_group() {
        let pool = memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            let group_id = seed_college_group(&conn);
            conn.execute("INSERT INTO categories (name, group_id) VALUES ('Расписание', ?1)", [group_id]).unwrap();
            conn.execute("INSERT INTO categories (name, group_id) VALUES ('Общее', NULL)", []).unwrap();
            let grouped = insert_plain(&conn, "Grouped", AudienceDescriptor::general(), 0);
            let loose = insert_plain(&conn, "Loose", AudienceDescriptor::general(), 1);
            insert_plain(&conn, "Uncategorised", AudienceDescriptor::general(), 2);
            conn.execute("INSERT INTO article_categories (article_id, category_id) VALUES (?1, 1), (?1, 2)", [grouped])
                .unwrap();
            conn.execute("INSERT INTO article_categories (article_id, category_id) VALUES (?1, 2)", [loose]).unwrap();
        }
        let filter = ArticleListFilter { category_group_id: Some(1), ..ArticleListFilter::default() };
        let page = list_articles(&pool, &filter, &ContextQuery::default(), None, 1, 10).unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.articles[0].title, "Grouped");

        let other = ArticleListFilter { category_group_id: Some(2), ..ArticleListFilter::default() };
        assert_eq!(list_articles(&pool, &other, &ContextQuery::default(), None, 1, 10).unwrap().pagination.total, 0);
    }

    #[test]
    fn anonymous_listing_hides_drafts() {
        let pool = memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            let draft = insert_plain(&conn, "Draft", AudienceDescriptor::general(), 0);
            conn.execute("UPDATE articles SET is_published = 0 WHERE id = ?1", [draft]).unwrap();
            insert_plain(&conn, "Live", AudienceDescriptor::general(), 1);
        }
        let anonymous = restrict_for_viewer(ArticleListFilter::default(), None);
        let page = list_articles(&pool, &anonymous, &ContextQuery::default(), None, 1, 10).unwrap();
        assert_eq!(page.articles.len(), 1);

        let editor = Actor { user_id: 1, role: Role::Editor };
        let staff = restrict_for_viewer(ArticleListFilter::default(), Some(&editor));
        assert_eq!(list_articles(&pool, &staff, &ContextQuery::default(), None, 1, 10).unwrap().pagination.total, 2);
    }
}

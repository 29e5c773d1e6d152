use crate::models::audience::{AudienceDescriptor, AudienceKind, LegacyAudience, Rule};
use crate::models::db_operations::DbError;
use crate::models::{
    format_timestamp, parse_timestamp, Article, ArticleListFilter, ArticleTag, AuthorSummary, NewArticle,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub const ARTICLE_COLUMNS: &str = "a.id, a.title, a.content, a.is_published, a.is_for_staff, a.is_actual, a.tag, \
     a.created_at, a.updated_at, a.archive_at, a.archived_at, a.views_count, a.audience_rules, \
     a.audience, a.audience_city_id, a.audience_course, a.audience_courses, a.audience_admission_year_id, \
     a.education_form_id, a.speciality_id, a.school_class_id, a.institution_type_id, a.base_class";

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn audience_at(row: &Row) -> rusqlite::Result<AudienceDescriptor> {
    if let Some(json) = row.get::<_, Option<String>>(12)? {
        let rules: Vec<Rule> = serde_json::from_str(&json).map_err(|e| conversion_error(12, e))?;
        return Ok(AudienceDescriptor::Rules(rules.into_iter().map(Rule::canonical).collect()));
    }

    let audience = match row.get::<_, Option<String>>(13)? {
        Some(raw) => match AudienceKind::parse(&raw) {
            Ok(kind) => Some(kind),
            Err(e) => {
                log::warn!("Ignoring legacy audience value on article {}: {}", row.get::<_, i64>(0)?, e);
                None
            }
        },
        None => None,
    };
    let courses = match row.get::<_, Option<String>>(16)? {
        Some(raw) if !raw.trim().is_empty() => {
            Some(serde_json::from_str::<Vec<i64>>(&raw).map_err(|e| conversion_error(16, e))?)
        }
        _ => None,
    };

    Ok(AudienceDescriptor::Legacy(LegacyAudience {
        audience,
        city_id: row.get(14)?,
        course: row.get(15)?,
        courses,
        admission_year_id: row.get(17)?,
        education_form_id: row.get(18)?,
        speciality_id: row.get(19)?,
        school_class_id: row.get(20)?,
        institution_type_id: row.get(21)?,
        base_class: row.get(22)?,
    }))
}

pub fn map_article_row(row: &Row) -> rusqlite::Result<Article> {
    let tag: Option<String> = row.get(6)?;
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        is_published: row.get(3)?,
        is_for_staff: row.get(4)?,
        is_actual: row.get(5)?,
        tag: tag.as_deref().and_then(ArticleTag::parse),
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
        archive_at: optional_timestamp_at(row, 9)?,
        archived_at: optional_timestamp_at(row, 10)?,
        views_count: row.get(11)?,
        audience: audience_at(row)?,
    })
}

/// Column values for one descriptor. Canonical rules go to `audience_rules` and also
/// fill the coarse `audience` / `audience_city_id` / `audience_course` columns the feed
/// filter reads; a legacy tuple fills the legacy columns only.
struct AudienceColumns {
    rules_json: Option<String>,
    legacy: LegacyAudience,
    courses_json: Option<String>,
}

fn audience_columns(audience: &AudienceDescriptor) -> Result<AudienceColumns, DbError> {
    Ok(match audience {
        AudienceDescriptor::Rules(rules) => AudienceColumns {
            rules_json: Some(serde_json::to_string(rules)?),
            legacy: audience.coarse_columns(),
            courses_json: None,
        },
        AudienceDescriptor::Legacy(legacy) => AudienceColumns {
            rules_json: None,
            courses_json: match &legacy.courses {
                Some(courses) => Some(serde_json::to_string(courses)?),
                None => None,
            },
            legacy: legacy.clone(),
        },
    })
}

pub fn insert_article(conn: &Connection, article: &NewArticle, now: &DateTime<Utc>) -> Result<i64, DbError> {
    let cols = audience_columns(&article.audience)?;
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO articles (
            title, content, is_published, is_for_staff, is_actual, tag, created_at, updated_at, views_count,
            audience_rules, audience, audience_city_id, audience_course, audience_courses,
            audience_admission_year_id, education_form_id, speciality_id, school_class_id,
            institution_type_id, base_class
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            article.title,
            article.content,
            article.is_published,
            article.is_for_staff,
            article.is_actual,
            article.tag.map(ArticleTag::as_str),
            ts,
            cols.rules_json,
            cols.legacy.audience.map(AudienceKind::as_str),
            cols.legacy.city_id,
            cols.legacy.course,
            cols.courses_json,
            cols.legacy.admission_year_id,
            cols.legacy.education_form_id,
            cols.legacy.speciality_id,
            cols.legacy.school_class_id,
            cols.legacy.institution_type_id,
            cols.legacy.base_class,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes every mutable column of `article` back to its row.
pub fn update_article(conn: &Connection, article: &Article, now: &DateTime<Utc>) -> Result<(), DbError> {
    let cols = audience_columns(&article.audience)?;
    let changed = conn.execute(
        "UPDATE articles SET
            title = ?1, content = ?2, is_published = ?3, is_for_staff = ?4, is_actual = ?5, tag = ?6,
            updated_at = ?7, audience_rules = ?8, audience = ?9, audience_city_id = ?10,
            audience_course = ?11, audience_courses = ?12, audience_admission_year_id = ?13,
            education_form_id = ?14, speciality_id = ?15, school_class_id = ?16,
            institution_type_id = ?17, base_class = ?18
         WHERE id = ?19",
        params![
            article.title,
            article.content,
            article.is_published,
            article.is_for_staff,
            article.is_actual,
            article.tag.map(ArticleTag::as_str),
            format_timestamp(now),
            cols.rules_json,
            cols.legacy.audience.map(AudienceKind::as_str),
            cols.legacy.city_id,
            cols.legacy.course,
            cols.courses_json,
            cols.legacy.admission_year_id,
            cols.legacy.education_form_id,
            cols.legacy.speciality_id,
            cols.legacy.school_class_id,
            cols.legacy.institution_type_id,
            cols.legacy.base_class,
            article.id,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("article {}", article.id)));
    }
    Ok(())
}

pub fn set_published(conn: &Connection, article_id: i64, published: bool, now: &DateTime<Utc>) -> Result<usize, DbError> {
    Ok(conn.execute(
        "UPDATE articles SET is_published = ?1, updated_at = ?2 WHERE id = ?3",
        params![published, format_timestamp(now), article_id],
    )?)
}

/// Link rows (authors, categories, media, reactions, views) go with it via ON DELETE CASCADE.
pub fn delete_article(conn: &Connection, article_id: i64) -> Result<usize, DbError> {
    Ok(conn.execute("DELETE FROM articles WHERE id = ?1", [article_id])?)
}

pub fn read_article(conn: &Connection, article_id: i64) -> Result<Option<Article>, DbError> {
    let sql = format!("SELECT {} FROM articles a WHERE a.id = ?1", ARTICLE_COLUMNS);
    Ok(conn.query_row(&sql, [article_id], map_article_row).optional()?)
}

pub fn add_author(conn: &Connection, article_id: i64, user_id: i64) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO article_authors (article_id, user_id) VALUES (?1, ?2)",
        params![article_id, user_id],
    )?;
    Ok(())
}

pub fn read_author_ids(conn: &Connection, article_id: i64) -> Result<Vec<i64>, DbError> {
    let mut stmt = conn.prepare("SELECT user_id FROM article_authors WHERE article_id = ?1 ORDER BY user_id")?;
    let rows = stmt.query_map([article_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

pub fn read_authors(conn: &Connection, article_id: i64) -> Result<Vec<AuthorSummary>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.full_name, u.email FROM article_authors aa
         JOIN users u ON u.id = aa.user_id
         WHERE aa.article_id = ?1 ORDER BY u.id",
    )?;
    let rows = stmt.query_map([article_id], |row| {
        Ok(AuthorSummary { id: row.get(0)?, full_name: row.get(1)?, email: row.get(2)? })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Splits `ids` into existing category ids and unknown ones, dropping repeats.
pub fn partition_category_ids(conn: &Connection, ids: &[i64]) -> Result<(Vec<i64>, Vec<i64>), DbError> {
    let mut found = Vec::new();
    let mut skipped = Vec::new();
    for &id in ids {
        if found.contains(&id) || skipped.contains(&id) {
            continue;
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        if exists {
            found.push(id);
        } else {
            skipped.push(id);
        }
    }
    Ok((found, skipped))
}

/// Replaces the article's category links with `category_ids` (already validated).
pub fn replace_categories(conn: &Connection, article_id: i64, category_ids: &[i64]) -> Result<(), DbError> {
    conn.execute("DELETE FROM article_categories WHERE article_id = ?1", [article_id])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO article_categories (article_id, category_id) VALUES (?1, ?2)")?;
    for &category_id in category_ids {
        stmt.execute(params![article_id, category_id])?;
    }
    Ok(())
}

pub fn read_category_ids(conn: &Connection, article_id: i64) -> Result<Vec<i64>, DbError> {
    let mut stmt = conn.prepare("SELECT category_id FROM article_categories WHERE article_id = ?1 ORDER BY category_id")?;
    let rows = stmt.query_map([article_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

/// Best-effort view counter: a plain read-modify-write with no row lock, so
/// concurrent readers may lose increments. Returns the count written.
pub fn record_view(conn: &Connection, article_id: i64, user_id: Option<i64>, now: &DateTime<Utc>) -> Result<i64, DbError> {
    let current: i64 = conn.query_row(
        "SELECT views_count FROM articles WHERE id = ?1",
        [article_id],
        |row| row.get(0),
    )?;
    let next = current + 1;
    conn.execute("UPDATE articles SET views_count = ?1 WHERE id = ?2", params![next, article_id])?;
    conn.execute(
        "INSERT INTO article_views (article_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![article_id, user_id, format_timestamp(now)],
    )?;
    Ok(next)
}

/// Published, student-facing rows admitted by the coarse audience clause,
/// newest first with the id as tie-break.
pub fn read_feed_candidates(conn: &Connection, coarse_clause: &str, coarse_params: &[Value]) -> Result<Vec<Article>, DbError> {
    let sql = format!(
        "SELECT {} FROM articles a
         WHERE a.is_published = 1 AND a.is_for_staff = 0 AND a.archived_at IS NULL AND {}
         ORDER BY a.created_at DESC, a.id DESC",
        ARTICLE_COLUMNS, coarse_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(coarse_params.iter()), map_article_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn escape_like(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn list_where_clause(filter: &ArticleListFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(flag) = filter.is_published {
        clauses.push("a.is_published = ?");
        values.push(Value::Integer(i64::from(flag)));
    }
    if let Some(flag) = filter.is_for_staff {
        clauses.push("a.is_for_staff = ?");
        values.push(Value::Integer(i64::from(flag)));
    }
    if let Some(flag) = filter.is_actual {
        clauses.push("a.is_actual = ?");
        values.push(Value::Integer(i64::from(flag)));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("a.title LIKE ? ESCAPE '\\'");
        values.push(Value::Text(format!("%{}%", escape_like(search))));
    }
    if let Some(category_id) = filter.category_id {
        clauses.push("EXISTS (SELECT 1 FROM article_categories ac WHERE ac.article_id = a.id AND ac.category_id = ?)");
        values.push(Value::Integer(category_id));
    }
    if let Some(group_id) = filter.category_group_id {
        clauses.push(
            "EXISTS (SELECT 1 FROM article_categories ac JOIN categories c ON c.id = ac.category_id \
             WHERE ac.article_id = a.id AND c.group_id = ?)",
        );
        values.push(Value::Integer(group_id));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Lists articles matching the column filters. `window` is `(limit, offset)`;
/// `None` returns every matching row.
pub fn query_articles(conn: &Connection, filter: &ArticleListFilter, window: Option<(u32, u32)>) -> Result<Vec<Article>, DbError> {
    let (where_sql, mut values) = list_where_clause(filter);
    let mut sql = format!(
        "SELECT {} FROM articles a{} ORDER BY {}",
        ARTICLE_COLUMNS,
        where_sql,
        filter.sort.order_by()
    );
    if let Some((limit, offset)) = window {
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::from(limit)));
        values.push(Value::Integer(i64::from(offset)));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_article_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_articles(conn: &Connection, filter: &ArticleListFilter) -> Result<u64, DbError> {
    let (where_sql, values) = list_where_clause(filter);
    let sql = format!("SELECT COUNT(*) FROM articles a{}", where_sql);
    let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

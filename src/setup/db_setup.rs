use rusqlite::{Connection, Result as RusqliteResult, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Applied to every pooled connection; cascades depend on it.
pub const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

const REFERENCE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS institution_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL CHECK(kind IN ('school', 'college', 'university'))
    );
    CREATE TABLE IF NOT EXISTS cities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS specialities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        institution_type_id INTEGER REFERENCES institution_types(id)
    );
    CREATE TABLE IF NOT EXISTS education_forms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        institution_type_id INTEGER REFERENCES institution_types(id)
    );
    CREATE TABLE IF NOT EXISTS admission_years (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        year INTEGER NOT NULL,
        description TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        institution_type_id INTEGER REFERENCES institution_types(id)
    );
    CREATE TABLE IF NOT EXISTS school_classes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        institution_type_id INTEGER NOT NULL REFERENCES institution_types(id)
    );
    CREATE TABLE IF NOT EXISTS student_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        display_name TEXT NOT NULL UNIQUE,
        institution_type_id INTEGER NOT NULL REFERENCES institution_types(id),
        speciality_id INTEGER REFERENCES specialities(id),
        education_form_id INTEGER REFERENCES education_forms(id),
        admission_year_id INTEGER REFERENCES admission_years(id),
        school_class_id INTEGER REFERENCES school_classes(id),
        city_id INTEGER REFERENCES cities(id)
    );
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        group_id INTEGER REFERENCES student_groups(id) ON DELETE SET NULL
    );
";

const USER_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL CHECK(role IN ('admin', 'editor', 'reader')),
        full_name TEXT
    );
";

const ARTICLE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        is_published INTEGER NOT NULL DEFAULT 0,
        is_for_staff INTEGER NOT NULL DEFAULT 0,
        is_actual INTEGER NOT NULL DEFAULT 1,
        tag TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        archive_at TEXT,
        archived_at TEXT,
        views_count INTEGER NOT NULL DEFAULT 0,
        audience_rules TEXT,
        audience TEXT,
        audience_city_id INTEGER REFERENCES cities(id),
        audience_course INTEGER,
        audience_courses TEXT,
        audience_admission_year_id INTEGER REFERENCES admission_years(id),
        education_form_id INTEGER REFERENCES education_forms(id),
        speciality_id INTEGER REFERENCES specialities(id),
        school_class_id INTEGER REFERENCES school_classes(id),
        institution_type_id INTEGER REFERENCES institution_types(id),
        base_class INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles (is_published, created_at DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_articles_audience_city ON articles (audience, audience_city_id);
    CREATE INDEX IF NOT EXISTS idx_articles_audience_course ON articles (audience, audience_course);

    CREATE TABLE IF NOT EXISTS article_authors (
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        PRIMARY KEY (article_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS article_categories (
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        PRIMARY KEY (article_id, category_id)
    );
    CREATE TABLE IF NOT EXISTS article_media_links (
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        media_id INTEGER NOT NULL,
        position INTEGER,
        PRIMARY KEY (article_id, media_id)
    );
    CREATE TABLE IF NOT EXISTS article_reactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        emoji TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS article_views (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    );
";

pub fn setup_kb_db(conn: &mut Connection) -> Result<(), SetupError> {
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    let tx = conn.transaction()?;
    log::info!("Creating reference tables...");
    tx.execute_batch(REFERENCE_TABLES)?;
    log::info!("Creating user tables...");
    tx.execute_batch(USER_TABLES)?;
    log::info!("Creating article tables...");
    tx.execute_batch(ARTICLE_TABLES)?;
    tx.commit()?;
    Ok(())
}

/// Idempotently inserts the baseline institution types, cities and education forms.
pub fn seed_reference_data(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    seed_institution_types(&tx)?;
    seed_cities(&tx)?;
    seed_education_forms(&tx)?;
    tx.commit()?;
    Ok(())
}

fn seed_institution_types(tx: &Transaction) -> RusqliteResult<()> {
    for (name, kind) in [("Школа", "school"), ("Колледж", "college"), ("Вуз", "university")] {
        tx.execute(
            "INSERT OR IGNORE INTO institution_types (name, kind) VALUES (?1, ?2)",
            [name, kind],
        )?;
    }
    log::info!("Seeded institution types.");
    Ok(())
}

fn seed_cities(tx: &Transaction) -> RusqliteResult<()> {
    for name in ["Москва", "Санкт-Петербург", "Екатеринбург", "Новосибирск", "Ростов-на-Дону", "Краснодар"] {
        tx.execute("INSERT OR IGNORE INTO cities (name) VALUES (?1)", [name])?;
    }
    log::info!("Seeded cities.");
    Ok(())
}

fn seed_education_forms(tx: &Transaction) -> RusqliteResult<()> {
    let forms: [(&str, &[&str]); 3] = [
        ("Школа", &["Очная"]),
        ("Колледж", &["Очная", "Заочная", "Очно-заочная", "Дистанционная"]),
        ("Вуз", &["Очная", "Заочная", "Очно-заочная"]),
    ];
    for (institution, names) in forms {
        for name in names {
            // No unique key on (name, institution_type_id), so check before inserting.
            tx.execute(
                "INSERT INTO education_forms (name, institution_type_id)
                 SELECT ?1, it.id FROM institution_types it
                 WHERE it.name = ?2 AND NOT EXISTS (
                     SELECT 1 FROM education_forms ef WHERE ef.name = ?1 AND ef.institution_type_id = it.id
                 )",
                [*name, institution],
            )?;
        }
    }
    log::info!("Seeded education forms.");
    Ok(())
}

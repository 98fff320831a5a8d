//! Document database operations.

use rusqlite::{params, ErrorCode, OptionalExtension};
use serde_json::Value;

use super::{Database, DbError, DbResult, Document, DocumentStore};
use crate::models::generate_record_id;

impl DocumentStore for Database {
    fn add(&self, collection: &str, document: &Document) -> DbResult<String> {
        let mut body = document.clone();
        let id = match body.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                let id = generate_record_id();
                body.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        let body_json = serde_json::to_string(&body)?;

        self.conn
            .execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection, id, body_json],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    DbError::Constraint(format!(
                        "Document {} already exists in {}",
                        id, collection
                    ))
                }
                other => other.into(),
            })?;
        Ok(id)
    }

    fn get_by_id(&self, collection: &str, id: &str) -> DbResult<Option<Document>> {
        self.conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|body| parse_body(&body))
            .transpose()
    }

    fn get_by_filter(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> DbResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT body
            FROM documents
            WHERE collection = ?
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map([collection], |row| row.get::<_, String>(0))?;

        let mut documents = Vec::new();
        for row in rows {
            let document = parse_body(&row?)?;
            if predicate(&document) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn update(&self, collection: &str, id: &str, patch: &Document) -> DbResult<bool> {
        let Some(mut document) = self.get_by_id(collection, id)? else {
            return Ok(false);
        };

        if let Some(new_id) = patch.get("id") {
            if new_id.as_str() != Some(id) {
                return Err(DbError::Constraint(format!(
                    "Cannot change id of document {} in {}",
                    id, collection
                )));
            }
        }

        for (key, value) in patch {
            document.insert(key.clone(), value.clone());
        }
        let body_json = serde_json::to_string(&document)?;

        let rows_affected = self.conn.execute(
            r#"
            UPDATE documents SET
                body = ?3,
                updated_at = datetime('now')
            WHERE collection = ?1 AND id = ?2
            "#,
            params![collection, id, body_json],
        )?;
        Ok(rows_affected > 0)
    }

    fn delete(&self, collection: &str, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(rows_affected > 0)
    }
}

fn parse_body(body: &str) -> DbResult<Document> {
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(members) => members,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_add_and_get() {
        let db = setup_db();

        let id = db
            .add("patients", &doc(json!({"id": "p1", "active": true})))
            .unwrap();
        assert_eq!(id, "p1");

        let retrieved = db.get_by_id("patients", "p1").unwrap().unwrap();
        assert_eq!(retrieved["active"], json!(true));

        // Collections are separate namespaces
        assert!(db.get_by_id("ehr_records", "p1").unwrap().is_none());
    }

    #[test]
    fn test_add_assigns_missing_id() {
        let db = setup_db();

        let id = db.add("ehr_records", &doc(json!({"active": true}))).unwrap();
        assert_eq!(id.len(), 32);

        let retrieved = db.get_by_id("ehr_records", &id).unwrap().unwrap();
        assert_eq!(retrieved["id"], json!(id));

        let null_id = db.add("ehr_records", &doc(json!({"id": null}))).unwrap();
        assert_ne!(null_id, id);
    }

    #[test]
    fn test_add_duplicate_is_constraint_error() {
        let db = setup_db();
        db.add("patients", &doc(json!({"id": "p1"}))).unwrap();

        let result = db.add("patients", &doc(json!({"id": "p1"})));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_get_by_filter_keeps_insertion_order() {
        let db = setup_db();
        db.add("patients", &doc(json!({"id": "b", "active": true}))).unwrap();
        db.add("patients", &doc(json!({"id": "a", "active": false}))).unwrap();
        db.add("patients", &doc(json!({"id": "c", "active": true}))).unwrap();

        let active = db
            .get_by_filter("patients", &|d| d.get("active") == Some(&Value::Bool(true)))
            .unwrap();
        let ids: Vec<_> = active.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("c")]);

        assert_eq!(db.get_all("patients").unwrap().len(), 3);
    }

    #[test]
    fn test_update_merges_members() {
        let db = setup_db();
        db.add("patients", &doc(json!({"id": "p1", "active": true, "last_update": 1.0})))
            .unwrap();

        let updated = db
            .update("patients", "p1", &doc(json!({"active": false, "last_update": 2.0})))
            .unwrap();
        assert!(updated);

        let retrieved = db.get_by_id("patients", "p1").unwrap().unwrap();
        assert_eq!(
            Value::Object(retrieved),
            json!({"id": "p1", "active": false, "last_update": 2.0})
        );
    }

    #[test]
    fn test_update_missing_returns_false() {
        let db = setup_db();
        let updated = db.update("patients", "nope", &doc(json!({"active": false}))).unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_update_cannot_change_id() {
        let db = setup_db();
        db.add("patients", &doc(json!({"id": "p1"}))).unwrap();

        let result = db.update("patients", "p1", &doc(json!({"id": "p2"})));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_delete() {
        let db = setup_db();
        db.add("patients", &doc(json!({"id": "p1"}))).unwrap();

        assert!(db.delete("patients", "p1").unwrap());
        assert!(!db.delete("patients", "p1").unwrap());
        assert!(db.get_by_id("patients", "p1").unwrap().is_none());
    }
}

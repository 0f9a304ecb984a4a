// Relation Lifecycle Engine
// Cascading drop, rename, alter and schema/catalog operations.
// SQL Server has no DROP ... CASCADE, so dependents are discovered from the
// system catalogs and dropped first, in dependency order.

use crate::db::connection::ConnectionManager;
use crate::db::dialect;
use crate::db::handler::exception_handler;
use crate::db::traits::{AdapterResult, CellValue, Column, QueryResult, Relation, RelationKind};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// How `drop_schema` treats relations still inside the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaDrop {
    /// Let the backend reject a non-empty schema
    #[default]
    Restrict,
    /// Drop every relation (and its dependents) first
    Cascade,
}

/// A foreign key on `table` that references a relation being dropped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyRef {
    pub schema: String,
    pub table: String,
    pub constraint: String,
}

/// One statement of a cascading drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropStep {
    Constraint(ForeignKeyRef),
    Relation(Relation),
}

impl DropStep {
    pub fn sql(&self) -> String {
        match self {
            DropStep::Constraint(fk) => {
                dialect::drop_constraint_sql(&fk.schema, &fk.table, &fk.constraint)
            }
            DropStep::Relation(rel) => dialect::drop_relation_sql(&rel.schema, &rel.name, rel.kind),
        }
    }
}

/// Dependents discovered from a target relation
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependents: HashMap<Relation, Vec<Relation>>,
    foreign_keys: Vec<ForeignKeyRef>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` references `relation`
    pub fn add_dependent(&mut self, relation: &Relation, dependent: Relation) {
        let entry = self.dependents.entry(relation.clone()).or_default();
        if !entry.contains(&dependent) {
            entry.push(dependent);
        }
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKeyRef) {
        if !self.foreign_keys.contains(&fk) {
            self.foreign_keys.push(fk);
        }
    }

    pub fn dependents_of(&self, relation: &Relation) -> &[Relation] {
        self.dependents
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Relations to drop, every dependent strictly before what it depends on.
    /// The target is always last.
    pub fn cascade_order(&self, target: &Relation) -> Vec<Relation> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        self.visit(target, &mut seen, &mut order);
        order
    }

    fn visit(&self, relation: &Relation, seen: &mut HashSet<Relation>, order: &mut Vec<Relation>) {
        if !seen.insert(relation.clone()) {
            return;
        }
        for dependent in self.dependents_of(relation) {
            self.visit(dependent, seen, order);
        }
        order.push(relation.clone());
    }

    /// Full drop plan: foreign keys on surviving tables first, then relations
    pub fn drop_plan(&self, target: &Relation) -> Vec<DropStep> {
        let relations = self.cascade_order(target);
        let dropped: HashSet<(&str, &str)> = relations
            .iter()
            .map(|r| (r.schema.as_str(), r.name.as_str()))
            .collect();

        let mut steps: Vec<DropStep> = self
            .foreign_keys
            .iter()
            .filter(|fk| !dropped.contains(&(fk.schema.as_str(), fk.table.as_str())))
            .cloned()
            .map(DropStep::Constraint)
            .collect();
        steps.extend(relations.into_iter().map(DropStep::Relation));
        steps
    }
}

/// Catalog column listing. Iterating it again restarts from the first column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    columns: Vec<Column>,
}

impl Columns {
    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

impl IntoIterator for Columns {
    type Item = Column;
    type IntoIter = std::vec::IntoIter<Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

fn cell_str(row: &[CellValue], idx: usize) -> Option<&str> {
    row.get(idx).and_then(CellValue::as_str)
}

fn cell_i32(row: &[CellValue], idx: usize) -> Option<i32> {
    row.get(idx)
        .and_then(CellValue::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

/// Relation and schema management on top of a connection manager
pub struct RelationEngine {
    manager: Arc<ConnectionManager>,
}

impl RelationEngine {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Execute one statement inside the exception boundary
    pub async fn add_query(
        &self,
        conn: &str,
        sql: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<QueryResult> {
        exception_handler(
            &self.manager,
            conn,
            sql,
            model_name,
            self.manager.execute(conn, sql, model_name),
        )
        .await
    }

    /// Kind of `schema.name` if it exists as a table or view
    pub async fn lookup_relation(
        &self,
        conn: &str,
        schema: &str,
        name: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<Option<RelationKind>> {
        let sql = dialect::relation_lookup_sql(schema, name);
        let result = self.add_query(conn, &sql, model_name).await?;
        Ok(result
            .rows
            .first()
            .and_then(|row| cell_str(row, 0))
            .map(RelationKind::from_catalog))
    }

    /// Walk the catalogs outward from `target`, collecting everything that depends on it
    pub async fn discover_dependents(
        &self,
        conn: &str,
        target: &Relation,
        model_name: Option<&str>,
    ) -> AdapterResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        let mut queued: HashSet<Relation> = HashSet::from([target.clone()]);
        let mut queue = VecDeque::from([target.clone()]);

        while let Some(relation) = queue.pop_front() {
            let sql = dialect::referencing_objects_sql(&relation.schema, &relation.name);
            let result = self.add_query(conn, &sql, model_name).await?;

            for row in &result.rows {
                let (Some(schema), Some(name)) = (cell_str(row, 0), cell_str(row, 1)) else {
                    continue;
                };
                let kind = cell_str(row, 2)
                    .map(RelationKind::from_catalog)
                    .unwrap_or(RelationKind::Other);
                let dependent = Relation::new(schema, name, kind);

                graph.add_dependent(&relation, dependent.clone());
                if queued.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }

            if relation.kind == RelationKind::Table {
                let sql = dialect::referencing_foreign_keys_sql(&relation.schema, &relation.name);
                let result = self.add_query(conn, &sql, model_name).await?;
                for row in &result.rows {
                    if let (Some(schema), Some(table), Some(constraint)) =
                        (cell_str(row, 0), cell_str(row, 1), cell_str(row, 2))
                    {
                        graph.add_foreign_key(ForeignKeyRef {
                            schema: schema.to_string(),
                            table: table.to_string(),
                            constraint: constraint.to_string(),
                        });
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Drop a relation together with everything that depends on it.
    ///
    /// Missing relations are skipped. The drops are separate DDL statements and
    /// are not rolled back if a later one fails; running the drop again picks up
    /// whatever is left.
    pub async fn drop_relation(
        &self,
        conn: &str,
        schema: &str,
        rel_name: &str,
        rel_type: RelationKind,
        model_name: Option<&str>,
    ) -> AdapterResult<Vec<DropStep>> {
        let Some(found_kind) = self.lookup_relation(conn, schema, rel_name, model_name).await? else {
            debug!(
                connection = conn,
                "Relation {} does not exist, skipping drop.",
                dialect::quote_schema_and_table(schema, rel_name)
            );
            return Ok(Vec::new());
        };

        if found_kind != rel_type {
            debug!(
                connection = conn,
                requested = %rel_type,
                found = %found_kind,
                "Dropping {} as the kind found in the catalog",
                dialect::quote_schema_and_table(schema, rel_name)
            );
        }

        let target = Relation::new(schema, rel_name, found_kind);
        let graph = self.discover_dependents(conn, &target, model_name).await?;
        let plan = graph.drop_plan(&target);

        debug!(
            connection = conn,
            steps = plan.len(),
            "Dropping {} with {} dependent statement(s)",
            target,
            plan.len().saturating_sub(1)
        );

        for step in &plan {
            self.add_query(conn, &step.sql(), model_name).await?;
        }

        Ok(plan)
    }

    /// `sp_rename` within the same schema; backend rejections surface as errors
    pub async fn rename(
        &self,
        conn: &str,
        schema: &str,
        from_name: &str,
        to_name: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        let sql = dialect::rename_statement(schema, from_name, to_name);
        self.add_query(conn, &sql, model_name).await?;
        Ok(())
    }

    /// Columns of `schema.table` in ordinal order. Missing tables yield no columns.
    pub async fn get_columns_in_table(
        &self,
        conn: &str,
        schema: &str,
        table: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<Columns> {
        let sql = dialect::columns_in_table_sql(schema, table);
        let result = self.add_query(conn, &sql, model_name).await?;

        let mut columns: Vec<Column> = result
            .rows
            .iter()
            .filter_map(|row| {
                Some(Column {
                    name: cell_str(row, 0)?.to_string(),
                    data_type: cell_str(row, 1).unwrap_or("unknown").to_string(),
                    is_nullable: cell_str(row, 2).map(|s| s == "YES").unwrap_or(true),
                    ordinal_position: cell_i32(row, 3).unwrap_or(0),
                    char_max_length: cell_i32(row, 4),
                    numeric_precision: cell_i32(row, 5),
                    numeric_scale: cell_i32(row, 6),
                })
            })
            .collect();
        columns.sort_by_key(|c| c.ordinal_position);

        Ok(Columns { columns })
    }

    pub async fn alter_column_type(
        &self,
        conn: &str,
        schema: &str,
        table: &str,
        column: &str,
        new_type: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        let sql = dialect::alter_column_type_sql(schema, table, column, new_type);
        self.add_query(conn, &sql, model_name).await?;
        Ok(())
    }

    pub async fn get_existing_schemas(
        &self,
        conn: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<BTreeSet<String>> {
        let result = self
            .add_query(conn, dialect::existing_schemas_sql(), model_name)
            .await?;
        Ok(result.first_column_strings().into_iter().collect())
    }

    pub async fn check_schema_exists(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<bool> {
        let sql = dialect::schema_exists_sql(schema);
        let result = self.add_query(conn, &sql, model_name).await?;
        let count = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(CellValue::as_i64)
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// Create `schema` unless it already exists
    pub async fn create_schema(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        if self.check_schema_exists(conn, schema, model_name).await? {
            debug!(connection = conn, "Schema \"{}\" already exists, skipping create.", schema);
            return Ok(());
        }

        info!(connection = conn, "Creating schema \"{}\".", schema);
        self.add_query(conn, &dialect::create_schema_sql(schema), model_name)
            .await?;
        Ok(())
    }

    /// Drop `schema`. Missing schemas are skipped.
    pub async fn drop_schema(
        &self,
        conn: &str,
        schema: &str,
        mode: SchemaDrop,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        if !self.check_schema_exists(conn, schema, model_name).await? {
            debug!(connection = conn, "Schema \"{}\" does not exist, skipping drop.", schema);
            return Ok(());
        }

        let cascade = mode == SchemaDrop::Cascade;
        info!(connection = conn, cascade, "Dropping schema \"{}\".", schema);

        if cascade {
            for relation in self.list_relations(conn, schema, model_name).await? {
                self.drop_relation(conn, &relation.schema, &relation.name, relation.kind, model_name)
                    .await?;
            }
        }

        self.add_query(conn, &dialect::drop_schema_sql(schema), model_name)
            .await?;
        Ok(())
    }

    /// Tables and views in `schema`, ordered by name
    pub async fn list_relations(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<Vec<Relation>> {
        let sql = dialect::relations_in_schemas_sql(&[schema.to_string()]);
        let result = self.add_query(conn, &sql, model_name).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(Relation::new(
                    cell_str(row, 0)?,
                    cell_str(row, 1)?,
                    RelationKind::from_catalog(cell_str(row, 2)?),
                ))
            })
            .collect())
    }

    /// Existing relations for several schemas in one round trip.
    /// Every requested schema is present in the result, possibly empty.
    pub async fn query_for_existing(
        &self,
        conn: &str,
        schemas: &[String],
        model_name: Option<&str>,
    ) -> AdapterResult<HashMap<String, HashMap<String, RelationKind>>> {
        let mut existing: HashMap<String, HashMap<String, RelationKind>> = schemas
            .iter()
            .map(|s| (s.clone(), HashMap::new()))
            .collect();
        if schemas.is_empty() {
            return Ok(existing);
        }

        // Schema names compare case-insensitively; rows are filed under the caller's spelling
        let mut requested: HashMap<String, Vec<&String>> = HashMap::new();
        for schema in schemas {
            let keys = requested.entry(schema.to_lowercase()).or_default();
            if !keys.contains(&schema) {
                keys.push(schema);
            }
        }

        let sql = dialect::relations_in_schemas_sql(schemas);
        let result = self.add_query(conn, &sql, model_name).await?;
        for row in &result.rows {
            let (Some(schema), Some(name), Some(kind)) =
                (cell_str(row, 0), cell_str(row, 1), cell_str(row, 2))
            else {
                continue;
            };
            let kind = RelationKind::from_catalog(kind);
            match requested.get(&schema.to_lowercase()) {
                Some(keys) => {
                    for key in keys {
                        if let Some(relations) = existing.get_mut(key.as_str()) {
                            relations.insert(name.to_string(), kind);
                        }
                    }
                }
                None => debug!(
                    connection = conn,
                    "Ignoring relation {}.{} outside the requested schemas",
                    schema,
                    name
                ),
            }
        }
        Ok(existing)
    }
}

//! Static description of the relational schema the SQL agent works against.
//!
//! The descriptor is part of the agent's prompt and answers its
//! introspection tools. It is never read back from the live database.

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDescriptor {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    fn pk(mut self, name: &str) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.to_string(),
            sql_type: "INTEGER".to_string(),
            primary_key: true,
        });
        self
    }

    fn col(mut self, name: &str, sql_type: &str) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            primary_key: false,
        });
        self
    }

    fn fk(mut self, column: &str, table: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: table.to_string(),
            references_column: references.to_string(),
        });
        self
    }

    /// `CREATE TABLE` statement for this table, in SQLite dialect.
    pub fn ddl(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.primary_key {
                    format!("    {} {} PRIMARY KEY AUTOINCREMENT", c.name, c.sql_type)
                } else {
                    format!("    {} {}", c.name, c.sql_type)
                }
            })
            .collect();
        lines.extend(self.foreign_keys.iter().map(|fk| {
            format!(
                "    FOREIGN KEY ({}) REFERENCES {}({})",
                fk.column, fk.references_table, fk.references_column
            )
        }));
        format!("CREATE TABLE {} (\n{}\n)", self.name, lines.join(",\n"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    /// The company database: leadership, departments, staff, projects,
    /// their tasks, hiring interviews and clients.
    pub fn company() -> Self {
        let tables = vec![
            TableDescriptor::new("CEO")
                .pk("CEO_ID")
                .col("NAME", "VARCHAR(50)")
                .col("EMAIL", "VARCHAR(50)"),
            TableDescriptor::new("DEPARTMENT")
                .pk("DEPT_ID")
                .col("NAME", "VARCHAR(30)"),
            TableDescriptor::new("MANAGER")
                .pk("MANAGER_ID")
                .col("NAME", "VARCHAR(50)")
                .col("DEPT_ID", "INTEGER")
                .col("EMAIL", "VARCHAR(50)")
                .fk("DEPT_ID", "DEPARTMENT", "DEPT_ID"),
            TableDescriptor::new("EMPLOYEE")
                .pk("EMP_ID")
                .col("NAME", "VARCHAR(50)")
                .col("DEPT_ID", "INTEGER")
                .col("MANAGER_ID", "INTEGER")
                .col("ROLE", "VARCHAR(30)")
                .col("EMAIL", "VARCHAR(50)")
                .fk("DEPT_ID", "DEPARTMENT", "DEPT_ID")
                .fk("MANAGER_ID", "MANAGER", "MANAGER_ID"),
            TableDescriptor::new("PROJECT")
                .pk("PROJECT_ID")
                .col("NAME", "VARCHAR(50)")
                .col("DEPT_ID", "INTEGER")
                .col("MANAGER_ID", "INTEGER")
                .col("STATUS", "VARCHAR(20)")
                .fk("DEPT_ID", "DEPARTMENT", "DEPT_ID")
                .fk("MANAGER_ID", "MANAGER", "MANAGER_ID"),
            TableDescriptor::new("TASK")
                .pk("TASK_ID")
                .col("PROJECT_ID", "INTEGER")
                .col("NAME", "VARCHAR(100)")
                .col("ASSIGNED_TO", "INTEGER")
                .col("STATUS", "VARCHAR(20)")
                .col("DEADLINE", "DATE")
                .fk("PROJECT_ID", "PROJECT", "PROJECT_ID")
                .fk("ASSIGNED_TO", "EMPLOYEE", "EMP_ID"),
            TableDescriptor::new("INTERVIEW")
                .pk("INTERVIEW_ID")
                .col("CANDIDATE_NAME", "VARCHAR(50)")
                .col("POSITION", "VARCHAR(30)")
                .col("HR_ID", "INTEGER")
                .col("RESULT", "VARCHAR(20)")
                .col("DATE", "DATE")
                .fk("HR_ID", "EMPLOYEE", "EMP_ID"),
            TableDescriptor::new("CLIENT")
                .pk("CLIENT_ID")
                .col("NAME", "VARCHAR(50)")
                .col("CONTACT", "VARCHAR(50)")
                .col("PROJECT_ID", "INTEGER")
                .col("STATUS", "VARCHAR(20)")
                .fk("PROJECT_ID", "PROJECT", "PROJECT_ID"),
        ];
        Self { tables }
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Prompt text: every table's DDL.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(TableDescriptor::ddl)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

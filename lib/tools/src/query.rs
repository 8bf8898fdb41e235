//! Minimal SOQL `SELECT` builder.
//!
//! Filters are raw SOQL fragments; callers build them from
//! [`beyond_ops_integration::soql`] helpers so user-supplied values are
//! always escaped.

#[derive(Debug, Clone)]
pub(crate) struct Select {
    object: &'static str,
    fields: Vec<&'static str>,
    filters: Vec<String>,
    group_by: Option<&'static str>,
    order_by: Option<&'static str>,
    limit: Option<u32>,
}

impl Select {
    pub(crate) fn new(object: &'static str, fields: &[&'static str]) -> Self {
        Self {
            object,
            fields: fields.to_vec(),
            filters: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
        }
    }

    pub(crate) fn filter(mut self, condition: impl Into<String>) -> Self {
        self.filters.push(condition.into());
        self
    }

    pub(crate) fn filter_opt(self, condition: Option<String>) -> Self {
        match condition {
            Some(condition) => self.filter(condition),
            None => self,
        }
    }

    pub(crate) fn group_by(mut self, clause: &'static str) -> Self {
        self.group_by = Some(clause);
        self
    }

    pub(crate) fn order_by(mut self, clause: &'static str) -> Self {
        self.order_by = Some(clause);
        self
    }

    pub(crate) fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn build(&self) -> String {
        let mut soql = format!("SELECT {} FROM {}", self.fields.join(", "), self.object);
        if !self.filters.is_empty() {
            soql.push_str(" WHERE ");
            soql.push_str(&self.filters.join(" AND "));
        }
        if let Some(group_by) = self.group_by {
            soql.push_str(" GROUP BY ");
            soql.push_str(group_by);
        }
        if let Some(order_by) = self.order_by {
            soql.push_str(" ORDER BY ");
            soql.push_str(order_by);
        }
        if let Some(limit) = self.limit {
            soql.push_str(&format!(" LIMIT {limit}"));
        }
        soql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_full_query() {
        let soql = Select::new("Lead", &["Id", "Name"])
            .filter("Status = 'Working'")
            .filter_opt(None)
            .filter("CreatedDate = THIS_WEEK")
            .order_by("CreatedDate DESC")
            .limit(10)
            .build();
        assert_eq!(
            soql,
            "SELECT Id, Name FROM Lead WHERE Status = 'Working' AND CreatedDate = THIS_WEEK \
             ORDER BY CreatedDate DESC LIMIT 10"
        );
    }

    #[test]
    fn builds_aggregate_query() {
        let soql = Select::new("Opportunity", &["StageName stage", "COUNT(Id) total"])
            .group_by("StageName")
            .build();
        assert_eq!(
            soql,
            "SELECT StageName stage, COUNT(Id) total FROM Opportunity GROUP BY StageName"
        );
    }
}

//! Warehouse view definition.
//!
//! [`WarehouseQuery::build`] assembles the flattened sale line view: which
//! tables are joined (and how), which columns come out (and under which
//! names), and which rows qualify. Nothing is executed here.
//!
//! The result is a plain value. Downstream modules may add joins, columns and
//! filter conjuncts to it before it is turned into a [`Select`].

use std::collections::BTreeMap;

use saledw_core::{EntityRegistry, RegistryResult, TableRef};

use crate::query::{Expr, JoinGraph, JoinKind, Select, SelectColumn, TableExt};

/// Logical model names read by the view.
pub mod model {
    pub const SALE_LINE: &str = "sale.line";
    pub const SALE: &str = "sale.sale";
    pub const PRODUCT: &str = "product.product";
    pub const PRODUCT_TEMPLATE: &str = "product.template";
    pub const PRODUCT_CATEGORY: &str = "product.category";
    pub const PARTY: &str = "party.party";
    pub const ADDRESS: &str = "party.address";
    pub const COUNTRY: &str = "country.country";
    pub const SUBDIVISION: &str = "country.subdivision";
    pub const CURRENCY: &str = "currency.currency";
    /// Provided by the optional `sale_channel` module.
    pub const SALE_CHANNEL: &str = "sale.channel";
}

/// Order states whose lines are reported.
pub const REPORTED_STATES: [&str; 3] = ["confirmed", "processing", "done"];

/// Line type of real product lines (as opposed to comments, titles, subtotals).
pub const LINE_TYPE: &str = "line";

/// Output columns, in order, when no channel module is installed.
pub const BASE_COLUMNS: [&str; 24] = [
    "id",
    "quantity",
    "amount",
    "product_code",
    "product_name",
    "product_category",
    "party_name",
    "party_id",
    "sale_id",
    "sale_reference",
    "currency",
    "state",
    "invoice_country_code",
    "invoice_country_name",
    "invoice_state_code",
    "invoice_state_name",
    "shipment_country_code",
    "shipment_country_name",
    "shipment_state_code",
    "shipment_state_name",
    "sale_date",
    "sale_year",
    "sale_month",
    "sale_day",
];

/// Columns appended when the channel model resolves.
pub const CHANNEL_COLUMNS: [&str; 2] = ["channel_code", "channel_name"];

/// The view definition: join graph, output columns, row filter and the
/// tables it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseQuery {
    pub from: JoinGraph,
    pub columns: Vec<SelectColumn>,
    pub filter: Expr,
    pub tables: BTreeMap<String, TableRef>,
}

impl WarehouseQuery {
    /// Build the sale line view definition.
    ///
    /// Every model except `sale.channel` is required; a missing one is an
    /// error. The channel join and its two columns are added only when the
    /// registry knows the model.
    pub fn build(registry: &dyn EntityRegistry) -> RegistryResult<Self> {
        let line = registry.table(model::SALE_LINE)?.aliased("line");
        let sale = registry.table(model::SALE)?.aliased("sale");

        let product = registry.table(model::PRODUCT)?.aliased("product");
        let template = registry.table(model::PRODUCT_TEMPLATE)?.aliased("template");
        let category = registry.table(model::PRODUCT_CATEGORY)?.aliased("category");

        let party = registry.table(model::PARTY)?.aliased("party");

        let address = registry.table(model::ADDRESS)?;
        let shipment_address = address.aliased("shipment_address");
        let invoice_address = address.aliased("invoice_address");

        let country = registry.table(model::COUNTRY)?;
        let subdivision = registry.table(model::SUBDIVISION)?;
        let invoice_country = country.aliased("invoice_country");
        let invoice_subdivision = subdivision.aliased("invoice_subdivision");
        let shipment_country = country.aliased("shipment_country");
        let shipment_subdivision = subdivision.aliased("shipment_subdivision");

        let currency = registry.table(model::CURRENCY)?.aliased("currency");

        let mut columns = vec![
            line.col("id").alias("id"),
            line.col("quantity").alias("quantity"),
            line.col("quantity").mul(line.col("unit_price")).alias("amount"),
            product.col("code").alias("product_code"),
            template.col("name").alias("product_name"),
            category.col("name").alias("product_category"),
            party.col("name").alias("party_name"),
            party.col("id").alias("party_id"),
            // Order
            sale.col("id").alias("sale_id"),
            sale.col("reference").alias("sale_reference"),
            currency.col("code").alias("currency"),
            sale.col("state").alias("state"),
            // Addresses
            invoice_country.col("code").alias("invoice_country_code"),
            invoice_country.col("name").alias("invoice_country_name"),
            invoice_subdivision.col("code").alias("invoice_state_code"),
            invoice_subdivision.col("name").alias("invoice_state_name"),
            shipment_country.col("code").alias("shipment_country_code"),
            shipment_country.col("name").alias("shipment_country_name"),
            shipment_subdivision.col("code").alias("shipment_state_code"),
            shipment_subdivision.col("name").alias("shipment_state_name"),
            // Sale date and its parts
            sale.col("sale_date").alias("sale_date"),
            sale.col("sale_date").to_char("YYYY").alias("sale_year"),
            sale.col("sale_date").to_char("MM").alias("sale_month"),
            sale.col("sale_date").to_char("dd").alias("sale_day"),
        ];

        // A line without an order is broken data: drop it rather than pad it.
        let mut from = JoinGraph::new(line.clone())
            .join(&sale, line.col("sale").eq(sale.col("id")))
            .left_join(&product, line.col("product").eq(product.col("id")))
            .left_join(&template, product.col("template").eq(template.col("id")))
            .left_join(&category, template.col("category").eq(category.col("id")))
            .left_join(&party, sale.col("party").eq(party.col("id")))
            .left_join(
                &shipment_address,
                sale.col("shipment_address").eq(shipment_address.col("id")),
            )
            .left_join(
                &shipment_country,
                shipment_address.col("country").eq(shipment_country.col("id")),
            )
            .left_join(
                &shipment_subdivision,
                shipment_address
                    .col("subdivision")
                    .eq(shipment_subdivision.col("id")),
            )
            .left_join(
                &invoice_address,
                sale.col("invoice_address").eq(invoice_address.col("id")),
            )
            .left_join(
                &invoice_country,
                invoice_address.col("country").eq(invoice_country.col("id")),
            )
            .left_join(
                &invoice_subdivision,
                invoice_address
                    .col("subdivision")
                    .eq(invoice_subdivision.col("id")),
            )
            .left_join(&currency, sale.col("currency").eq(currency.col("id")));

        let mut tables: BTreeMap<String, TableRef> = [
            (model::SALE_LINE, &line),
            (model::SALE, &sale),
            (model::PRODUCT, &product),
            (model::PRODUCT_TEMPLATE, &template),
            (model::PRODUCT_CATEGORY, &category),
            (model::PARTY, &party),
            (model::CURRENCY, &currency),
        ]
        .into_iter()
        .map(|(name, table)| (name.to_string(), table.clone()))
        .collect();

        if let Some(channel) = registry.resolve(model::SALE_CHANNEL) {
            let channel = channel.aliased("channel");
            from.push(
                JoinKind::LeftOuter,
                &channel,
                sale.col("channel").eq(channel.col("id")),
            );
            columns.push(channel.col("code").alias("channel_code"));
            columns.push(channel.col("name").alias("channel_name"));
            tables.insert(model::SALE_CHANNEL.to_string(), channel);
        }

        let filter = sale
            .col("state")
            .in_list(REPORTED_STATES)
            .and(line.col("type").eq(Expr::lit(LINE_TYPE)));

        Ok(Self {
            from,
            columns,
            filter,
            tables,
        })
    }

    /// Table handle by logical model name.
    pub fn table(&self, model: &str) -> Option<&TableRef> {
        self.tables.get(model)
    }

    pub fn has_channel(&self) -> bool {
        self.tables.contains_key(model::SALE_CHANNEL)
    }

    /// Add a left-outer join, registering the table under `model`.
    pub fn left_join(&mut self, model: &str, table: &TableRef, on: Expr) {
        self.from.push(JoinKind::LeftOuter, table, on);
        self.tables.insert(model.to_string(), table.clone());
    }

    /// Append an output column at the end of the list.
    pub fn push_column(&mut self, column: SelectColumn) {
        self.columns.push(column);
    }

    /// Narrow the row filter with an extra conjunct.
    pub fn and_filter(&mut self, predicate: Expr) {
        let current = std::mem::replace(&mut self.filter, Expr::lit(true));
        self.filter = current.and(predicate);
    }

    pub fn column_aliases(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.alias.as_str())
    }

    /// The SELECT the snapshot is created from.
    pub fn select(&self) -> Select {
        Select::new(
            self.from.clone(),
            self.columns.clone(),
            Some(self.filter.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ParamStyle;
    use saledw_core::{RegistryError, StaticRegistry};

    fn registry(with_channel: bool) -> StaticRegistry {
        let mut registry = StaticRegistry::new();
        for name in [
            model::SALE_LINE,
            model::SALE,
            model::PRODUCT,
            model::PRODUCT_TEMPLATE,
            model::PRODUCT_CATEGORY,
            model::PARTY,
            model::ADDRESS,
            model::COUNTRY,
            model::SUBDIVISION,
            model::CURRENCY,
        ] {
            registry.register(name).unwrap();
        }
        if with_channel {
            registry.register(model::SALE_CHANNEL).unwrap();
        }
        registry
    }

    #[test]
    fn base_columns_in_fixed_order() {
        let query = WarehouseQuery::build(&registry(false)).unwrap();
        let aliases: Vec<&str> = query.column_aliases().collect();
        assert_eq!(aliases, BASE_COLUMNS.to_vec());
        assert!(!query.has_channel());
    }

    #[test]
    fn only_the_order_join_is_inner() {
        let query = WarehouseQuery::build(&registry(false)).unwrap();
        let joins = query.from.joins();
        assert_eq!(joins.len(), 12);
        assert_eq!(joins[0].kind, JoinKind::Inner);
        assert_eq!(joins[0].table.alias(), "sale");
        assert!(joins[1..].iter().all(|j| j.kind == JoinKind::LeftOuter));
    }

    #[test]
    fn channel_adds_one_join_and_two_trailing_columns() {
        let without = WarehouseQuery::build(&registry(false)).unwrap();
        let with = WarehouseQuery::build(&registry(true)).unwrap();

        assert_eq!(with.from.len(), without.from.len() + 1);
        let last = with.from.joins().last().unwrap();
        assert_eq!(last.kind, JoinKind::LeftOuter);
        assert_eq!(last.table.table(), "sale_channel");

        let aliases: Vec<&str> = with.column_aliases().collect();
        assert_eq!(&aliases[..BASE_COLUMNS.len()], &BASE_COLUMNS[..]);
        assert_eq!(&aliases[BASE_COLUMNS.len()..], &CHANNEL_COLUMNS[..]);
        assert!(with.has_channel());
    }

    #[test]
    fn missing_required_model_propagates() {
        let mut registry = StaticRegistry::new();
        registry.register(model::SALE_LINE).unwrap();
        let err = WarehouseQuery::build(&registry).unwrap_err();
        assert_eq!(err, RegistryError::NotRegistered(model::SALE.to_string()));
    }

    #[test]
    fn filter_requires_reported_state_and_line_type() {
        let query = WarehouseQuery::build(&registry(false)).unwrap();
        let rendered = query.select().to_sql(ParamStyle::Inline).unwrap();
        let filter = concat!(
            r#"WHERE (("sale"."state" IN ('confirmed', 'processing', 'done'))"#,
            r#" AND ("line"."type" = 'line'))"#,
        );
        assert!(rendered.sql.ends_with(filter), "{}", rendered.sql);
        assert!(rendered.sql.contains(
            r#"TO_CHAR("sale"."sale_date", 'YYYY') AS "sale_year""#
        ));
        let invoice_join = concat!(
            r#"LEFT OUTER JOIN "party_address" AS "invoice_address""#,
            r#" ON ("sale"."invoice_address" = "invoice_address"."id")"#,
        );
        assert!(rendered.sql.contains(invoice_join));
    }

    #[test]
    fn numbered_rendering_binds_filter_values() {
        let query = WarehouseQuery::build(&registry(false)).unwrap();
        let rendered = query.select().to_sql(ParamStyle::Numbered).unwrap();
        assert_eq!(rendered.params.len(), 4);
        assert!(rendered.sql.contains("IN ($1, $2, $3)"));
        assert!(rendered.sql.contains(r#"("line"."type" = $4)"#));
    }

    #[test]
    fn downstream_extension_builds_on_the_returned_value() {
        let mut registry = registry(false);
        registry.register("sale.opportunity").unwrap();
        let mut query = WarehouseQuery::build(&registry).unwrap();

        let sale = query.table(model::SALE).unwrap().clone();
        let opportunity = registry.table("sale.opportunity").unwrap().aliased("opportunity");
        query.left_join(
            "sale.opportunity",
            &opportunity,
            sale.col("origin_opportunity").eq(opportunity.col("id")),
        );
        query.push_column(opportunity.col("reference").alias("opportunity_reference"));
        query.and_filter(sale.col("company").eq(Expr::lit(1)));

        let select = query.select();
        select.validate().unwrap();
        assert_eq!(select.columns().len(), BASE_COLUMNS.len() + 1);
        assert_eq!(select.join_graph().len(), 13);
        assert!(query.table("sale.opportunity").is_some());
    }
}

use anyhow::{Result, bail};
use bpaf::Bpaf;
use optimade_client::{FilterBuilder, FilterField, FilterValue, JsonConverter};
use tracing::{debug, instrument};

use super::{find_provider, terminal_session};
use crate::config::Config;
use crate::utils::message;
use crate::utils::view::render_snapshot;

/// Parse a count filter: `LOW..HIGH` is an inclusive range,
/// anything else an operator and integer such as `>=3`.
fn parse_count(value: String) -> Result<FilterValue, String> {
    let Some((low, high)) = value.split_once("..") else {
        return Ok(FilterValue::Text(value));
    };
    let bound = |bound: &str| {
        bound
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{bound}' is not an integer in range '{value}'"))
    };
    Ok(FilterValue::Range(bound(low)?, bound(high)?))
}

// Search structures in a database
#[derive(Debug, Bpaf, Clone)]
pub struct Search {
    /// Id of the provider, as listed by `optimade providers`
    #[bpaf(long, short, argument("PROVIDER"))]
    pub provider: String,

    /// Id of the database (default: the first database of the provider)
    #[bpaf(long, short, argument("DATABASE"))]
    pub database: Option<String>,

    /// Elements that must all be present, e.g. `Si, O`
    #[bpaf(long, short, argument("ELEMENTS"))]
    pub elements: Option<String>,

    /// Part of the descriptive chemical formula
    #[bpaf(long, argument("FORMULA"))]
    pub formula: Option<String>,

    /// Anonymous chemical formula, e.g. `A2B`
    #[bpaf(long, argument("FORMULA"))]
    pub anonymous: Option<String>,

    /// Structure id
    #[bpaf(long, argument("ID"))]
    pub id: Option<String>,

    /// Number of elements, e.g. `3`, `>=2` or `2..4`
    #[bpaf(long, argument::<String>("COUNT"), parse(parse_count), optional)]
    pub nelements: Option<FilterValue>,

    /// Number of sites, e.g. `<10` or `1..8`
    #[bpaf(long, argument::<String>("COUNT"), parse(parse_count), optional)]
    pub nsites: Option<FilterValue>,

    /// Periodic dimensions: 0 (molecule), 1 (wire), 2 (plane) or 3 (bulk)
    #[bpaf(long, argument("N"))]
    pub dimensions: Option<u8>,

    /// Sort by a property, prefix with `-` for descending order
    #[bpaf(long, argument("PROPERTY"))]
    pub sort: Option<String>,

    /// Results per page
    #[bpaf(long, argument("N"))]
    pub limit: Option<u64>,

    /// 1-based page to show
    #[bpaf(long, argument("PAGE"), fallback(1))]
    pub page: u64,

    /// Print results as a JSON array of structure resources
    #[bpaf(long)]
    pub json: bool,

    /// Print result INDEX of the page as JSON instead of listing results
    #[bpaf(long, argument("INDEX"))]
    pub export: Option<usize>,
}

impl Search {
    /// Filter fields set on the command line.
    fn filters(&self) -> FilterBuilder {
        let mut filters = FilterBuilder::new();
        let text = [
            (FilterField::Id, &self.id),
            (FilterField::ChemicalFormulaDescriptive, &self.formula),
            (FilterField::ChemicalFormulaAnonymous, &self.anonymous),
            (FilterField::Elements, &self.elements),
        ];
        for (field, value) in text {
            if let Some(value) = value {
                filters.set(field, value.as_str());
            }
        }
        if let Some(value) = &self.nelements {
            filters.set(FilterField::NElements, value.clone());
        }
        if let Some(value) = &self.nsites {
            filters.set(FilterField::NSites, value.clone());
        }
        if let Some(dimensions) = self.dimensions {
            filters.set(FilterField::DimensionTypes, FilterValue::Choice(dimensions));
        }
        filters
    }

    #[instrument(name = "search", skip_all, fields(provider = %self.provider))]
    pub async fn handle(self, mut config: Config) -> Result<()> {
        if let Some(limit) = self.limit {
            config.client.page_limit = limit;
        }
        if self.page == 0 {
            bail!("pages are numbered from 1");
        }

        let mut session = terminal_session(&config, self.json)?;
        let provider = find_provider(&mut session, &self.provider).await?;
        let databases = session.select_provider(provider).await?;

        let database = match &self.database {
            Some(id) => databases.into_iter().find(|database| &database.id == id),
            None => databases.into_iter().next(),
        };
        let Some(database) = database else {
            bail!("no database to search for provider '{}'", self.provider);
        };
        debug!(database = %database.id, "selected database");
        session.select_database(database).await?;

        if let Some(sort) = &self.sort {
            let field = sort.trim_start_matches('-');
            let known = session.sort_fields();
            if !known.is_empty() && !known.iter().any(|known| known == field) {
                message::warning(format!(
                    "'{field}' is not a sortable property of this database"
                ));
            }
        }
        session.set_sort(self.sort.clone());

        let hidden = self.page > 1 || self.export.is_some();
        session.view_mut().hidden = hidden;
        session.fetch_by_filter(&self.filters()).await?;

        if self.page > 1 {
            let last = session.pagination().last_page();
            if self.page > last {
                bail!("page {} is out of range, the last page is {last}", self.page);
            }
            session.view_mut().hidden = self.export.is_some();
            session.goto_page(self.page).await?;
        }

        message::plain(render_snapshot(&session.pagination().snapshot()));

        if let Some(index) = self.export {
            let exported = session.export(index, "json", &JsonConverter)?;
            println!("{exported}");
        }
        Ok(())
    }
}

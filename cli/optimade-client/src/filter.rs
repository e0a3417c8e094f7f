//! Translate user input into an OPTIMADE filter string.
//!
//! Every supported field is a [FilterField] with its own parser. Input is
//! validated before anything is sent, so malformed input fails with a
//! [ParseError] naming the field instead of a server error.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::LazyLock;

use derive_more::Display;
use regex::Regex;
use semver::Version;
use tracing::debug;

use crate::error::ParseError;

/// Element symbols as recognized by IUPAC.
pub const ELEMENT_SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

static ELEMENTS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ELEMENT_SYMBOLS.into_iter().collect());

static OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<=|>=|<|>|=").expect("valid regex"));
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static OPERATOR_AND_INTEGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<op><=|>=|<|>|=)?\s*(?P<int>\d+)\s*$").expect("valid regex")
});
static ELEMENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\s]+").expect("valid regex"));

/// Servers implementing an `api_version` before this need `unknown_positions`
/// excluded explicitly.
static UNKNOWN_POSITIONS_BEFORE: LazyLock<Version> =
    LazyLock::new(|| Version::parse("1.0.0-rc.2").expect("valid version"));

// region: fields

/// A structure property that can be filtered on.
///
/// Clauses are emitted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum FilterField {
    #[display("id")]
    Id,
    #[display("chemical_formula_descriptive")]
    ChemicalFormulaDescriptive,
    #[display("chemical_formula_anonymous")]
    ChemicalFormulaAnonymous,
    #[display("elements")]
    Elements,
    #[display("nelements")]
    NElements,
    #[display("nsites")]
    NSites,
    #[display("dimension_types")]
    DimensionTypes,
}

/// Parses a value of a field into filter fragments.
type FieldParser = fn(FilterField, &FilterValue) -> Result<Vec<String>, ParseError>;

impl FilterField {
    pub const ALL: [FilterField; 7] = [
        FilterField::Id,
        FilterField::ChemicalFormulaDescriptive,
        FilterField::ChemicalFormulaAnonymous,
        FilterField::Elements,
        FilterField::NElements,
        FilterField::NSites,
        FilterField::DimensionTypes,
    ];

    /// The OPTIMADE property name.
    pub fn name(&self) -> String {
        self.to_string()
    }

    fn parser(&self) -> FieldParser {
        match self {
            FilterField::Id
            | FilterField::ChemicalFormulaDescriptive
            | FilterField::ChemicalFormulaAnonymous => parse_text,
            FilterField::Elements => parse_elements,
            FilterField::NElements | FilterField::NSites => parse_integer,
            FilterField::DimensionTypes => parse_dimension_types,
        }
    }

    /// The filter clause for one parsed fragment.
    pub fn clause(&self, fragment: &str) -> String {
        match self {
            FilterField::Id => format!("id={fragment}"),
            FilterField::ChemicalFormulaDescriptive => {
                format!("chemical_formula_descriptive CONTAINS {fragment}")
            },
            FilterField::ChemicalFormulaAnonymous => {
                format!("chemical_formula_anonymous={fragment}")
            },
            FilterField::Elements => format!("elements HAS ALL {fragment}"),
            FilterField::NElements | FilterField::NSites => format!("{self}{fragment}"),
            FilterField::DimensionTypes => format!("dimension_types HAS {fragment}"),
        }
    }
}

impl FromStr for FilterField {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterField::ALL
            .into_iter()
            .find(|field| field.name() == s.trim())
            .ok_or_else(|| ParseError::new("field", s, "not a filterable property"))
    }
}

/// User input for a [FilterField].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    /// Inclusive `(low, high)` range.
    Range(i64, i64),
    /// Index into a fixed table of choices.
    Choice(u8),
}

impl From<&str> for FilterValue {
    fn from(text: &str) -> Self {
        FilterValue::Text(text.to_string())
    }
}

// endregion: fields

// region: parsers

/// Quote free text: strip quotes and wrap in double quotes.
///
/// Empty input yields `None`.
pub fn descriptive_text(value: &str) -> Option<String> {
    let text = value.replace(['"', '\''], "");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(format!("\"{text}\""))
    }
}

/// Parse a list of element symbols into `"Si","Al","O"`.
///
/// Symbols are separated by commas or whitespace and capitalized before
/// being checked against [ELEMENT_SYMBOLS]. Empty input yields `None`.
pub fn elements(field: &str, value: &str) -> Result<Option<String>, ParseError> {
    let mut symbols: Vec<String> = Vec::new();
    for token in ELEMENT_SEPARATOR.split(value.trim()).filter(|t| !t.is_empty()) {
        let letters = token
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_lowercase();
        let mut chars = letters.chars();
        let symbol = match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        };

        if !ELEMENTS.contains(symbol.as_str()) {
            return Err(ParseError::new(
                field,
                value,
                format!("'{token}' is not a known element symbol"),
            ));
        }
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        symbols
            .iter()
            .map(|symbol| format!("\"{symbol}\""))
            .collect::<Vec<_>>()
            .join(","),
    ))
}

/// Parse `<op><integer>` into a comparison fragment such as `>=3`.
///
/// A missing operator means `=`. Empty input yields `None`.
pub fn operator_and_integer(field: &str, value: &str) -> Result<Option<String>, ParseError> {
    if value.trim().is_empty() {
        return Ok(None);
    }

    let operators = OPERATOR.find_iter(value).count();
    let integers = INTEGER.find_iter(value).count();
    let reason = if operators > 1 {
        Some("more than one operator")
    } else if integers == 0 {
        Some("no integer")
    } else if integers > 1 {
        Some("more than one integer")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(ParseError::new(field, value, reason));
    }

    let captures = OPERATOR_AND_INTEGER.captures(value).ok_or_else(|| {
        ParseError::new(field, value, "expected an optional operator followed by an integer")
    })?;
    let operator = captures.name("op").map_or("=", |op| op.as_str());
    let integer = captures
        .name("int")
        .map(|int| int.as_str().trim_start_matches('0'))
        .map(|int| if int.is_empty() { "0" } else { int })
        .unwrap_or("0");

    Ok(Some(format!("{operator}{integer}")))
}

/// Comparison fragments for an inclusive range.
pub fn ranged_int(field: &str, (low, high): (i64, i64)) -> Result<Vec<String>, ParseError> {
    if low > high {
        return Err(ParseError::new(
            field,
            format!("({low}, {high})"),
            "lower bound is greater than upper bound",
        ));
    }
    if low == high {
        Ok(vec![format!("={low}")])
    } else {
        Ok(vec![format!(">={low}"), format!("<={high}")])
    }
}

/// Map a dimensionality choice (0-3) to a `HAS` fragment.
///
/// Choices 1 and 2 both map to `ALL 0,1`.
pub fn dimension_types(field: &str, choice: u8) -> Result<String, ParseError> {
    let fragment = match choice {
        0 => "ONLY 0",
        1 | 2 => "ALL 0,1",
        3 => "ONLY 1",
        _ => {
            return Err(ParseError::new(
                field,
                choice.to_string(),
                "expected a dimensionality between 0 and 3",
            ));
        },
    };
    Ok(fragment.to_string())
}

fn unsupported(field: FilterField, value: &FilterValue) -> ParseError {
    ParseError::new(field.name(), format!("{value:?}"), "unsupported kind of input")
}

fn parse_text(field: FilterField, value: &FilterValue) -> Result<Vec<String>, ParseError> {
    match value {
        FilterValue::Text(text) => Ok(descriptive_text(text).into_iter().collect()),
        _ => Err(unsupported(field, value)),
    }
}

fn parse_elements(field: FilterField, value: &FilterValue) -> Result<Vec<String>, ParseError> {
    match value {
        FilterValue::Text(text) => Ok(elements(&field.name(), text)?.into_iter().collect()),
        _ => Err(unsupported(field, value)),
    }
}

fn parse_integer(field: FilterField, value: &FilterValue) -> Result<Vec<String>, ParseError> {
    match value {
        FilterValue::Text(text) => Ok(operator_and_integer(&field.name(), text)?
            .into_iter()
            .collect()),
        FilterValue::Range(low, high) => ranged_int(&field.name(), (*low, *high)),
        FilterValue::Choice(_) => Err(unsupported(field, value)),
    }
}

fn parse_dimension_types(
    field: FilterField,
    value: &FilterValue,
) -> Result<Vec<String>, ParseError> {
    let choice = match value {
        FilterValue::Choice(choice) => *choice,
        FilterValue::Text(text) if text.trim().is_empty() => return Ok(Vec::new()),
        FilterValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| ParseError::new(field.name(), text, "expected a number between 0 and 3"))?,
        FilterValue::Range(..) => return Err(unsupported(field, value)),
    };
    Ok(vec![dimension_types(&field.name(), choice)?])
}

// endregion: parsers

/// Collects user input per field and renders it as one filter string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterBuilder {
    values: BTreeMap<FilterField, FilterValue>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: FilterField, value: impl Into<FilterValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: FilterField, value: impl Into<FilterValue>) {
        self.values.insert(field, value.into());
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `value` into the filter fragments of `field`, e.g. `=3` for
    /// `nelements` and `3`.
    pub fn parse(field: FilterField, value: &FilterValue) -> Result<Vec<String>, ParseError> {
        (field.parser())(field, value)
    }

    /// The complete filter clauses for `field` and `value`.
    pub fn clauses(field: FilterField, value: &FilterValue) -> Result<Vec<String>, ParseError> {
        Ok(Self::parse(field, value)?
            .iter()
            .map(|fragment| field.clause(fragment))
            .collect())
    }

    /// Render all collected input, joined with ` AND `.
    ///
    /// Fields with empty input are left out. Fails on the first field with
    /// malformed input.
    pub fn collect(&self) -> Result<String, ParseError> {
        let mut clauses = Vec::new();
        for (field, value) in &self.values {
            clauses.extend(Self::clauses(*field, value)?);
        }
        let filter = clauses.join(" AND ");
        debug!(filter, "collected filter");
        Ok(filter)
    }
}

/// Exclude structures the client cannot handle.
///
/// Structures with assemblies are always excluded. Servers implementing an
/// `api_version` before 1.0.0-rc.2 also get `unknown_positions` excluded.
pub fn with_safety_clause(filter: &str, api_version: Option<&str>) -> String {
    let predates_rc2 = api_version
        .and_then(|version| Version::parse(version.trim().trim_start_matches('v')).ok())
        .is_some_and(|version| version < *UNKNOWN_POSITIONS_BEFORE);

    let safety = if predates_rc2 {
        r#"NOT structure_features HAS ANY "assemblies","unknown_positions""#
    } else {
        r#"NOT structure_features HAS ANY "assemblies""#
    };

    if filter.trim().is_empty() {
        safety.to_string()
    } else {
        format!("( {filter} ) AND ( {safety} )")
    }
}

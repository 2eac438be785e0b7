use scraper::{Html, Selector};
use serde_json::{Map, Value};
use trawl_core::error::AppError;
use trawl_core::job::JobRequest;

/// Parser that maps field names to CSS selectors.
///
/// Each field takes the trimmed text of the first element matching its
/// selector, or `null` when nothing matches.
#[derive(Debug, Clone)]
pub struct SelectorParser {
    fields: Vec<(String, Selector)>,
}

impl SelectorParser {
    pub fn new<I, K, V>(fields: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|(name, css)| {
                let name = name.into();
                let selector = Selector::parse(css.as_ref()).map_err(|e| {
                    AppError::config(format!("invalid selector for '{name}': {e}"))
                })?;
                Ok((name, selector))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self { fields })
    }

    /// Parse `name=selector` pairs, as given on the command line.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, AppError> {
        let fields = pairs
            .iter()
            .map(|pair| {
                pair.as_ref()
                    .split_once('=')
                    .map(|(name, css)| (name.trim().to_string(), css.trim().to_string()))
                    .ok_or_else(|| {
                        AppError::config(format!(
                            "expected name=selector, got '{}'",
                            pair.as_ref()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Self::new(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn extract(&self, html: &str) -> Value {
        let document = Html::parse_document(html);
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, selector)| {
                let text = document
                    .select(selector)
                    .next()
                    .map(|el| Value::String(el.text().collect::<String>().trim().to_string()))
                    .unwrap_or(Value::Null);
                (name.clone(), text)
            })
            .collect();
        Value::Object(object)
    }

    /// Turn into a function suitable for `Scraper::set_parser`.
    pub fn into_parser(
        self,
    ) -> impl Fn(&str, &JobRequest) -> Result<Value, AppError> + Send + Sync + 'static {
        move |body, _req| Ok(self.extract(body))
    }
}

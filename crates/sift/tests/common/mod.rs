#![allow(dead_code)]

use parking_lot::Mutex;
use sift::{
    loader_fn, FilterDefinition, FilterDependency, FilterOption, FilterSet, LoadRequest,
    OptionsLoader, OptionsPage,
};
use std::sync::Arc;
use std::time::Duration;

/// Requests seen by a loader, shared with the test.
pub type Calls = Arc<Mutex<Vec<LoadRequest>>>;

/// Loader answering with the cities of the requested country whose name
/// contains the search text, after `delay`.
pub fn city_loader(delay: Duration) -> (impl OptionsLoader, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let loader = loader_fn(move |request: LoadRequest| {
        seen.lock().push(request.clone());
        async move {
            tokio::time::sleep(delay).await;
            let country = request
                .dependencies
                .get("country")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let cities: &[&str] = match country.as_str() {
                "fr" => &["Paris", "Lyon", "Lille", "Nice"],
                "de" => &["Berlin", "Bonn", "Bremen"],
                _ => &[],
            };
            let needle = request.search.to_lowercase();
            let options = cities
                .iter()
                .filter(|city| city.to_lowercase().contains(&needle))
                .map(|city| FilterOption::new(city.to_lowercase(), *city))
                .collect();
            Ok(OptionsPage::new(options).with_more(false))
        }
    });
    (loader, calls)
}

/// `country` (static select) and `city` (loaded, reset and reloaded when
/// the country changes, hidden until one is chosen).
pub fn location_filters(cities: impl OptionsLoader + 'static) -> FilterSet {
    FilterSet::new([
        FilterDefinition::select("country", "Country").options(vec![
            FilterOption::new("fr", "France"),
            FilterOption::new("de", "Germany"),
        ]),
        FilterDefinition::select("city", "City")
            .depends_on(FilterDependency::show_when("country").reset_on_change())
            .depends_on(FilterDependency::reload_on("country"))
            .loader(cities)
            .debounce(Duration::from_millis(200)),
        FilterDefinition::number_range("price", "Price").group("details"),
        FilterDefinition::date_range("listed", "Listed").group("details"),
        FilterDefinition::boolean("featured", "Featured"),
    ])
}

pub fn labels(options: &[FilterOption]) -> Vec<&str> {
    options.iter().map(|o| o.label.as_str()).collect()
}

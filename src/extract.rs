//! Field extraction from Forminator pricing pages.
//!
//! Two page layouts are supported:
//!
//! - **groups**: one form whose `.forminator-field` containers each hold a
//!   caption and a control. Fields are classified into print groups by
//!   label text ([`group_fields`]).
//! - **forms**: several shortcode widgets, one per product, each headed by
//!   an `h2.elementor-heading-title` ([`extract_product_forms`]).
//!
//! Malformed markup never fails extraction. Containers without a usable
//! control or caption are skipped and logged at `debug`; a page with no
//! fields yields an empty list.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

use pricegrid_core::classify::fields_for;
use pricegrid_core::models::{Field, PrintGroup, SELECT_KIND};

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

static FIELD_CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector(".forminator-field"));
static CONTROL: LazyLock<Selector> = LazyLock::new(|| selector("input, select, textarea"));
static LABEL: LazyLock<Selector> = LazyLock::new(|| selector("label"));
static OPTION: LazyLock<Selector> = LazyLock::new(|| selector("option"));
static SELECT: LazyLock<Selector> = LazyLock::new(|| selector("select"));
static WIDGET: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[data-widget_type="shortcode.default"]"#));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2.elementor-heading-title"));
static FORM: LazyLock<Selector> = LazyLock::new(|| selector("form.forminator-custom-form"));
static FORM_LABEL: LazyLock<Selector> = LazyLock::new(|| selector(".forminator-label"));

/// Knobs for [`extract_fields`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// `name` of the control that picks the print group. It decides group
    /// membership and is never itself a field.
    pub group_selector: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            group_selector: "select-3".to_string(),
        }
    }
}

/// One product's form in a multi-form page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductForm {
    pub product: String,
    pub fields: Vec<Field>,
}

/// Whitespace-collapsed text content of an element.
fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn option_texts(select: ElementRef<'_>) -> Vec<String> {
    select
        .select(&OPTION)
        .map(text_of)
        .filter(|text| !text.is_empty())
        .collect()
}

/// Every field of a single-form page, in document order.
pub fn extract_fields(html: &str, options: &ExtractOptions) -> Vec<Field> {
    let document = Html::parse_document(html);
    let mut fields = Vec::new();

    for container in document.select(&FIELD_CONTAINER) {
        let Some(control) = container.select(&CONTROL).next() else {
            debug!("skipping container without a control");
            continue;
        };

        let name = control.value().attr("name").unwrap_or("").trim();
        if name.is_empty() {
            debug!("skipping unnamed control");
            continue;
        }
        if name == options.group_selector {
            continue;
        }

        let label = container.select(&LABEL).next().map(text_of).unwrap_or_default();
        if label.is_empty() {
            debug!(name, "skipping control without a label");
            continue;
        }

        let tag = control.value().name();
        let kind = control
            .value()
            .attr("type")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(tag)
            .to_string();

        let options = if tag == SELECT_KIND {
            option_texts(control)
        } else {
            Vec::new()
        };
        if kind == SELECT_KIND && options.is_empty() {
            debug!(name, "skipping select without options");
            continue;
        }

        fields.push(Field {
            name: name.to_string(),
            label,
            kind,
            options,
        });
    }

    fields
}

/// Partition `fields` into every print group, in [`PrintGroup::ALL`] order.
///
/// Fields whose label names no color appear in both groups.
pub fn group_fields(fields: &[Field]) -> Vec<(PrintGroup, Vec<Field>)> {
    PrintGroup::ALL
        .iter()
        .map(|&group| (group, fields_for(fields, group)))
        .collect()
}

/// Product name of a widget: the nearest preceding sibling heading.
fn widget_heading(widget: ElementRef<'_>) -> Option<String> {
    widget
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .find_map(|sibling| {
            let heading = if HEADING.matches(&sibling) {
                Some(sibling)
            } else {
                sibling.select(&HEADING).next()
            };
            heading.map(text_of).filter(|text| !text.is_empty())
        })
}

/// `name`, or the first free `name #2`, `name #3`, ... if already taken.
fn unique_product(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} #{}", name, n);
        if used.insert(candidate.clone()) {
            warn!(heading = %name, product = %candidate, "duplicate product heading renamed");
            return candidate;
        }
        n += 1;
    }
}

/// Every product form of a multi-form page, in document order.
///
/// Within a form, `.forminator-label` captions are paired by position with
/// the visible selects; a select with no caption at its position is
/// ignored. Widgets without a form or without usable selects are skipped.
///
/// Product names are unique within the result: a repeated heading gets a
/// ` #n` suffix in document order, so each form syncs into its own group.
pub fn extract_product_forms(html: &str) -> Vec<ProductForm> {
    let document = Html::parse_document(html);
    let mut forms = Vec::new();
    let mut used = HashSet::new();

    for (index, widget) in document.select(&WIDGET).enumerate() {
        let product = widget_heading(widget).unwrap_or_else(|| format!("Form #{}", index + 1));

        let Some(form) = widget.select(&FORM).next() else {
            debug!(product = %product, "skipping widget without a form");
            continue;
        };

        let labels: Vec<String> = form.select(&FORM_LABEL).map(text_of).collect();
        let selects = form.select(&SELECT).filter(|select| {
            select.value().attr("aria-hidden") != Some("true")
                && select.select(&OPTION).next().is_some()
        });

        let mut fields = Vec::new();
        for (position, (label, select)) in labels.into_iter().zip(selects).enumerate() {
            let options = option_texts(select);
            if options.is_empty() {
                continue;
            }
            let name = select
                .value()
                .attr("name")
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("select-{}", position + 1));

            fields.push(Field {
                name,
                label,
                kind: SELECT_KIND.to_string(),
                options,
            });
        }

        if fields.is_empty() {
            debug!(product = %product, "skipping form without select fields");
            continue;
        }
        let product = unique_product(&mut used, product);
        forms.push(ProductForm { product, fields });
    }

    forms
}

/// Captions of every field container holding a select, in document order.
pub fn select_labels(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&FIELD_CONTAINER)
        .filter(|container| container.select(&SELECT).next().is_some())
        .filter_map(|container| container.select(&LABEL).next().map(text_of))
        .filter(|label| !label.is_empty())
        .collect()
}

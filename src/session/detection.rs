//! Login form detection
//!
//! Finds the username, password and submit controls on a login page. Explicit
//! selectors win; otherwise fixed rule lists are tried in priority order
//! (id-based, then name-based, then type-based) and the first match is used.

use super::{AuthError, Credentials, LoginField};
use crate::render::{FormMethod, FormSubmission};
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub const USERNAME_RULES: &[&str] = &[
    "#username",
    "#email",
    "#login",
    "input[id*='user']",
    "input[id*='email']",
    "input[name='username']",
    "input[name='email']",
    "input[name='login']",
    "input[name*='user']",
    "input[type='email']",
    "input[type='text']",
];

pub const PASSWORD_RULES: &[&str] = &[
    "#password",
    "input[id*='pass']",
    "input[name='password']",
    "input[name*='pass']",
    "input[type='password']",
];

pub const SUBMIT_RULES: &[&str] = &[
    "#login-button",
    "#submit",
    "button[name*='login']",
    "input[name*='login'][type='submit']",
    ".login-button",
    "button[type='submit']",
    "input[type='submit']",
    "button",
];

/// Caller-supplied selectors that replace rule-based detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub submit: Option<String>,
}

/// A login form located on a page, without credentials filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedForm {
    pub username_selector: String,
    pub password_selector: String,
    /// None when the form is submitted without a button
    pub submit_selector: Option<String>,
    pub action: String,
    pub method: FormMethod,
    username_field: String,
    password_field: String,
    submit_field: Option<(String, String)>,
    /// Other inputs the form carries (hidden tokens and the like)
    carried_fields: Vec<(String, String)>,
}

impl DetectedForm {
    /// Fills in credentials and produces the submission
    pub fn fill(&self, credentials: &Credentials, referer: &str) -> FormSubmission {
        let mut fields = self.carried_fields.clone();
        fields.push((self.username_field.clone(), credentials.username.clone()));
        fields.push((self.password_field.clone(), credentials.password().to_string()));
        if let Some(submit) = &self.submit_field {
            fields.push(submit.clone());
        }

        FormSubmission {
            action: self.action.clone(),
            method: self.method,
            fields,
            referer: referer.to_string(),
        }
    }
}

/// Locates the login controls on a rendered page
///
/// # Arguments
///
/// * `html` - The rendered login page
/// * `page_url` - Where the page was served from, for resolving the form action
/// * `overrides` - Explicit selectors; a missing match for one is an error
///
/// # Returns
///
/// * `Ok(DetectedForm)` - All required controls were found
/// * `Err(AuthError::SelectorNotFound)` - Naming the control that is missing
pub fn detect_login_form(
    html: &str,
    page_url: &Url,
    overrides: &SelectorOverrides,
) -> Result<DetectedForm, AuthError> {
    let document = Html::parse_document(html);
    let not_found = |field: LoginField| AuthError::SelectorNotFound {
        field,
        url: page_url.to_string(),
    };

    let (password_selector, password) =
        locate(&document, None, overrides.password.as_deref(), PASSWORD_RULES, true, None)
            .ok_or_else(|| not_found(LoginField::Password))?;

    let form = password
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().name() == "form");

    // A password input can match broad username rules like `input[id*='user']`
    let (username_selector, username) = locate(
        &document,
        form,
        overrides.username.as_deref(),
        USERNAME_RULES,
        true,
        Some(password),
    )
    .ok_or_else(|| not_found(LoginField::Username))?;

    let submit = match overrides.submit.as_deref() {
        Some(selector) => Some(
            locate(&document, form, Some(selector), SUBMIT_RULES, false, None)
                .ok_or_else(|| not_found(LoginField::Submit))?,
        ),
        None => locate(&document, form, None, SUBMIT_RULES, false, None),
    };
    if submit.is_none() && form.is_none() {
        return Err(not_found(LoginField::Submit));
    }

    let username_field = field_name(&username).ok_or_else(|| not_found(LoginField::Username))?;
    let password_field = field_name(&password).ok_or_else(|| not_found(LoginField::Password))?;

    let (action, method) = match form {
        Some(form) => {
            let action = form
                .value()
                .attr("action")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .and_then(|a| page_url.join(a).ok())
                .unwrap_or_else(|| page_url.clone());
            let method = match form.value().attr("method") {
                Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
                _ => FormMethod::Get,
            };
            (action, method)
        }
        None => (page_url.clone(), FormMethod::Post),
    };

    let carried_fields = match form {
        Some(form) => carried_inputs(form, &[&username_field, &password_field]),
        None => Vec::new(),
    };

    let submit_field = submit.as_ref().and_then(|(_, element)| {
        element.value().attr("name").map(|name| {
            (
                name.to_string(),
                element.value().attr("value").unwrap_or_default().to_string(),
            )
        })
    });

    Ok(DetectedForm {
        username_selector,
        password_selector,
        submit_selector: submit.map(|(selector, _)| selector),
        action: action.to_string(),
        method,
        username_field,
        password_field,
        submit_field,
        carried_fields,
    })
}

/// Finds the first element matching the override, or the first rule that matches
///
/// With `require_name`, rule matches that could not be submitted (no `name`
/// or `id`) are skipped. A rule match on `exclude` is skipped too, so the
/// next element or rule gets its turn.
fn locate<'a>(
    document: &'a Html,
    scope: Option<ElementRef<'a>>,
    explicit: Option<&str>,
    rules: &[&str],
    require_name: bool,
    exclude: Option<ElementRef<'a>>,
) -> Option<(String, ElementRef<'a>)> {
    if let Some(selector) = explicit {
        let parsed = Selector::parse(selector).ok()?;
        return document
            .select(&parsed)
            .next()
            .map(|element| (selector.to_string(), element));
    }

    rules.iter().find_map(|rule| {
        let parsed = Selector::parse(rule).ok()?;
        let usable = |e: &ElementRef<'a>| {
            Some(*e) != exclude && (!require_name || field_name(e).is_some())
        };
        let found = match scope {
            Some(form) => form.select(&parsed).find(usable),
            None => document.select(&parsed).find(usable),
        };
        found.map(|element| (rule.to_string(), element))
    })
}

/// Name a control is submitted under: its `name`, else its `id`
fn field_name(element: &ElementRef<'_>) -> Option<String> {
    element
        .value()
        .attr("name")
        .or_else(|| element.value().attr("id"))
        .map(str::to_string)
}

fn carried_inputs(form: ElementRef<'_>, skip: &[&str]) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("input[name], textarea[name]") else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    for element in form.select(&selector) {
        let value = element.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        if skip.contains(&name) {
            continue;
        }

        let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
        match kind.as_str() {
            "submit" | "button" | "image" | "reset" | "file" | "password" => continue,
            "checkbox" | "radio" if value.attr("checked").is_none() => continue,
            _ => {}
        }

        let field_value = if value.name() == "textarea" {
            element.text().collect::<String>()
        } else {
            value
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| if kind == "checkbox" { "on".to_string() } else { String::new() })
        };
        fields.push((name.to_string(), field_value));
    }
    fields
}

//! State of an ASP.NET WebForms page, kept between requests.
//!
//! The registry pages are classic WebForms: every interaction is a POST of the whole form,
//! including the hidden `__VIEWSTATE` and friends, and some controls only work through the
//! `__doPostBack` javascript helper. [`WebForm`] captures what a browser would submit, lets the
//! caller change values, and produces the field list for the next POST.

use crate::{
    error::{Error, Result},
    util::{element_text, sel},
};
use lazy_static::lazy_static;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_until,
    character::complete::{char, multispace0},
    sequence::{delimited, preceded, separated_pair},
};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

pub static EVENT_TARGET: &str = "__EVENTTARGET";
pub static EVENT_ARGUMENT: &str = "__EVENTARGUMENT";

static POSTBACK_CALLS: [&str; 2] = ["__doPostBack(", "WebForm_PostBackOptions("];

lazy_static! {
    static ref SEL_FORM: Selector = sel("form");
    static ref SEL_INPUT: Selector = sel("input");
    static ref SEL_SELECT: Selector = sel("select");
    static ref SEL_OPTION: Selector = sel("option");
    static ref SEL_TEXTAREA: Selector = sel("textarea");
    static ref SEL_ANCHOR: Selector = sel("a[href]");
}

pub type Fields = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Postback {
    pub target: String,
    pub argument: String,
}

impl Postback {
    pub fn new(target: &str, argument: &str) -> Self {
        Self {
            target: target.into(),
            argument: argument.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
struct SelectControl {
    options: Vec<SelectOption>,
    auto_postback: bool,
}

#[derive(Debug, Clone)]
struct Button {
    name: String,
    value: String,
    /// image inputs submit the click position instead of their value
    image: bool,
}

#[derive(Debug, Clone)]
pub struct WebForm {
    action: Url,
    fields: Fields,
    /// control id => control name
    ids: HashMap<String, String>,
    /// by control name
    selects: HashMap<String, SelectControl>,
    /// submit inputs by id
    buttons: HashMap<String, Button>,
    /// anchors and buttons that submit through __doPostBack, by id
    postbacks: HashMap<String, Postback>,
}

impl WebForm {
    /// Capture the first form of the document
    pub fn parse(html: &Html, page_url: &Url) -> Result<Self> {
        let form = html
            .select(&SEL_FORM)
            .next()
            .ok_or_else(|| Error::MissingElement("form".into()))?;

        let action = match form.attr("action").map(str::trim) {
            None | Some("") => page_url.clone(),
            Some(a) => page_url.join(a)?,
        };

        let mut this = Self {
            action,
            fields: Vec::new(),
            ids: HashMap::new(),
            selects: HashMap::new(),
            buttons: HashMap::new(),
            postbacks: HashMap::new(),
        };

        for input in form.select(&SEL_INPUT) {
            this.add_input(&input);
        }
        for select in form.select(&SEL_SELECT) {
            this.add_select(&select);
        }
        for ta in form.select(&SEL_TEXTAREA) {
            if let Some(name) = enabled_name(&ta) {
                this.register_id(&ta, name);
                this.fields.push((name.into(), ta.text().collect()));
            }
        }
        for a in form.select(&SEL_ANCHOR) {
            if let (Some(id), Some(pb)) = (a.attr("id"), a.attr("href").and_then(parse_postback)) {
                this.postbacks.insert(id.into(), pb);
            }
        }

        Ok(this)
    }

    fn register_id(&mut self, e: &ElementRef, name: &str) {
        if let Some(id) = e.attr("id") {
            self.ids.insert(id.into(), name.into());
        }
    }

    fn add_input(&mut self, input: &ElementRef) {
        let kind = input.attr("type").unwrap_or("text").to_ascii_lowercase();
        let value = input.attr("value").unwrap_or_default();

        // javascript buttons have no name to submit, just an onclick postback
        let onclick = input.attr("onclick").and_then(parse_postback);
        if let (Some(id), Some(pb)) = (input.attr("id"), onclick) {
            self.postbacks.insert(id.into(), pb);
        }

        let Some(name) = enabled_name(input) else {
            return;
        };
        self.register_id(input, name);

        match kind.as_str() {
            "submit" | "image" | "button" => {
                if let Some(id) = input.attr("id") {
                    self.buttons.insert(
                        id.into(),
                        Button {
                            name: name.into(),
                            value: value.into(),
                            image: kind == "image",
                        },
                    );
                }
            }
            "checkbox" | "radio" => {
                if input.attr("checked").is_some() {
                    let v = if value.is_empty() { "on" } else { value };
                    self.fields.push((name.into(), v.into()));
                }
            }
            "file" | "reset" => (),
            _ => self.fields.push((name.into(), value.into())),
        }
    }

    fn add_select(&mut self, select: &ElementRef) {
        let Some(name) = enabled_name(select) else {
            return;
        };
        self.register_id(select, name);

        let mut selected = None;
        let options: Vec<SelectOption> = select
            .select(&SEL_OPTION)
            .map(|o| {
                let text = element_text(&o);
                let value = o.attr("value").map(String::from).unwrap_or_else(|| text.clone());
                if selected.is_none() && o.attr("selected").is_some() {
                    selected = Some(value.clone());
                }
                SelectOption { value, text }
            })
            .collect();

        if let Some(v) = selected.or_else(|| options.first().map(|o| o.value.clone())) {
            self.fields.push((name.into(), v));
        }
        let auto_postback = select
            .attr("onchange")
            .is_some_and(|js| js.contains("__doPostBack"));
        self.selects.insert(
            name.into(),
            SelectControl {
                options,
                auto_postback,
            },
        );
    }

    pub fn action(&self) -> &Url {
        &self.action
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Name of the control with the given id. ASP.NET derives names from ids, but with `$` as
    /// separator, so the two rarely match.
    pub fn name_by_id(&self, id: &str) -> Result<&str> {
        if let Some(name) = self.ids.get(id) {
            return Ok(name);
        }
        if let Some((k, _)) = self.fields.iter().find(|(k, _)| k == id) {
            return Ok(k);
        }
        Err(Error::MissingElement(format!("#{id}")))
    }

    fn set_field(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.into(),
            None => self.fields.push((name.into(), value.into())),
        }
    }

    /// Replace the value of a text control
    pub fn set_by_id(&mut self, id: &str, value: &str) -> Result<()> {
        let name = self.name_by_id(id)?.to_string();
        self.set_field(&name, value);
        Ok(())
    }

    /// Select the option with the given value. Returns the postback to send if the select posts
    /// back on change.
    pub fn select_by_value(&mut self, id: &str, value: &str) -> Result<Option<Postback>> {
        self.select_with(id, value, |o| o.value == value)
    }

    /// Select the option with the given visible text
    pub fn select_by_text(&mut self, id: &str, text: &str) -> Result<Option<Postback>> {
        self.select_with(id, text, |o| o.text == text.trim())
    }

    fn select_with<F>(&mut self, id: &str, wanted: &str, matches: F) -> Result<Option<Postback>>
    where
        F: Fn(&SelectOption) -> bool,
    {
        let name = self.name_by_id(id)?.to_string();
        let control = self
            .selects
            .get(&name)
            .ok_or_else(|| Error::MissingElement(format!("select#{id}")))?;
        let option = control
            .options
            .iter()
            .find(|o| matches(o))
            .ok_or_else(|| Error::NoOption {
                select: id.into(),
                option: wanted.into(),
            })?;
        let value = option.value.clone();
        let postback = control.auto_postback.then(|| Postback::new(&name, ""));
        self.set_field(&name, &value);
        Ok(postback)
    }

    /// Fields to POST when clicking the control with the given id
    pub fn click(&self, id: &str) -> Result<Fields> {
        if let Some(b) = self.buttons.get(id) {
            let mut fields = self.fields.clone();
            for (k, v) in fields.iter_mut() {
                if k == EVENT_TARGET || k == EVENT_ARGUMENT {
                    v.clear();
                }
            }
            if b.image {
                fields.push((format!("{}.x", b.name), "0".into()));
                fields.push((format!("{}.y", b.name), "0".into()));
            } else {
                fields.push((b.name.clone(), b.value.clone()));
            }
            return Ok(fields);
        }
        if let Some(pb) = self.postbacks.get(id) {
            return Ok(self.postback(pb));
        }
        Err(Error::MissingElement(format!("#{id}")))
    }

    /// Fields to POST for a `__doPostBack(target, argument)` call
    pub fn postback(&self, pb: &Postback) -> Fields {
        let mut fields = self.fields.clone();
        fields.retain(|(k, _)| k != EVENT_TARGET && k != EVENT_ARGUMENT);
        fields.push((EVENT_TARGET.into(), pb.target.clone()));
        fields.push((EVENT_ARGUMENT.into(), pb.argument.clone()));
        fields
    }
}

fn enabled_name<'a>(e: &ElementRef<'a>) -> Option<&'a str> {
    if e.attr("disabled").is_some() {
        return None;
    }
    e.attr("name").filter(|n| !n.is_empty())
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_until("'"), char('\'')),
        delimited(char('"'), take_until("\""), char('"')),
    ))
    .parse(input)
}

fn postback_args(input: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        multispace0,
        separated_pair(quoted, (multispace0, char(','), multispace0), quoted),
    )
    .parse(input)
}

/// Extract the target and argument of a postback call from a javascript snippet, such as
/// `javascript:__doPostBack('grid$ctl01','Page$2')` or
/// `WebForm_DoPostBackWithOptions(new WebForm_PostBackOptions("btn", "", true, "", "", false, true))`
pub fn parse_postback(js: &str) -> Option<Postback> {
    let start = POSTBACK_CALLS
        .iter()
        .find_map(|call| js.find(call).map(|i| i + call.len()))?;
    let (_, (target, argument)) = postback_args(&js[start..]).ok()?;
    Some(Postback::new(target, argument))
}

/// Pull the quoted string containing `needle` out of a javascript snippet, e.g.
/// `javascript:window.open('Imagen.aspx?id=1','_blank')` => `Imagen.aspx?id=1`
pub fn extract_js_url<'a>(js: &'a str, needle: &str) -> Option<&'a str> {
    let at = js.find(needle)?;
    let (open_at, quote) = js[..at]
        .char_indices()
        .rev()
        .find(|(_, c)| *c == '\'' || *c == '"')?;
    let start = open_at + quote.len_utf8();
    let len = js[start..].find(quote)?;
    Some(&js[start..start + len])
}

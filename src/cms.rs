//! Page-builder plugins and the components they render to.

use axum::extract::Path;
use axum::Extension;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Event, Offering};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Primary,
    Secondary,
    Success,
    Danger,
    Warning,
    Info,
    Light,
    Dark,
}

impl AlertType {
    pub fn parse(s: &str) -> Option<AlertType> {
        Some(match s {
            "primary" => AlertType::Primary,
            "secondary" => AlertType::Secondary,
            "success" => AlertType::Success,
            "danger" => AlertType::Danger,
            "warning" => AlertType::Warning,
            "info" => AlertType::Info,
            "light" => AlertType::Light,
            "dark" => AlertType::Dark,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Primary => "primary",
            AlertType::Secondary => "secondary",
            AlertType::Success => "success",
            AlertType::Danger => "danger",
            AlertType::Warning => "warning",
            AlertType::Info => "info",
            AlertType::Light => "light",
            AlertType::Dark => "dark",
        }
    }

    pub fn css_class(&self) -> String {
        format!("alert alert-{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "plugin_type", rename_all = "snake_case")]
pub enum PluginKind {
    Alert {
        title: Option<String>,
        content: String,
        #[serde(rename = "type")]
        alert_type: AlertType,
    },
    QuickLinks {
        title: Option<String>,
        text: Option<String>,
    },
    Row {
        column_classes: Option<String>,
    },
    PageTitle {
        title: String,
        subtitle: Option<String>,
    },
    Countdown {
        title: String,
        target: DateTime<Utc>,
    },
    UpcomingEventsAndCourses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: i64,
    pub placeholder_id: i64,
    pub parent_id: Option<i64>,
    pub position: i32,
    #[serde(flatten)]
    pub kind: PluginKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub class: String,
    pub content: Component,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "component", rename_all = "snake_case")]
pub enum Component {
    Alert {
        title: Option<String>,
        content: String,
        class: String,
    },
    QuickLinks {
        title: Option<String>,
        text: Option<String>,
        links: Vec<Component>,
    },
    Row {
        columns: Vec<Column>,
    },
    PageTitle {
        title: String,
        subtitle: Option<String>,
    },
    Countdown {
        title: String,
        target: DateTime<Utc>,
        seconds_left: i64,
    },
    Upcoming {
        events: Vec<Event>,
        offerings: Vec<Offering>,
    },
}

/// What the dynamic plugins need to know about the rest of the site.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub now: DateTime<Utc>,
    pub events: Vec<Event>,
    pub offerings: Vec<Offering>,
}

impl RenderContext {
    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// Renders the plugin `root` with its descendants taken from `plugins`.
pub fn render(root: &Plugin, plugins: &[Plugin], ctx: &RenderContext) -> Component {
    render_below(root, plugins, ctx, &[])
}

/// A plugin already on the path from the root is not rendered again, so
/// `parent_id` loops end there.
fn render_below(
    root: &Plugin,
    plugins: &[Plugin],
    ctx: &RenderContext,
    ancestors: &[i64],
) -> Component {
    let children = || {
        let mut path = ancestors.to_vec();
        path.push(root.id);
        let mut children: Vec<&Plugin> = plugins
            .iter()
            .filter(|p| p.parent_id == Some(root.id) && !path.contains(&p.id))
            .collect();
        children.sort_by_key(|p| (p.position, p.id));
        children
            .into_iter()
            .map(|child| render_below(child, plugins, ctx, &path))
            .collect::<Vec<_>>()
    };

    match &root.kind {
        PluginKind::Alert {
            title,
            content,
            alert_type,
        } => Component::Alert {
            title: title.clone(),
            content: content.clone(),
            class: alert_type.css_class(),
        },
        PluginKind::QuickLinks { title, text } => Component::QuickLinks {
            title: title.clone(),
            text: text.clone(),
            links: children(),
        },
        PluginKind::Row { column_classes } => {
            let classes: Vec<&str> = column_classes
                .as_deref()
                .map(|c| c.split_whitespace().collect())
                .unwrap_or_default();
            let columns = children()
                .into_iter()
                .enumerate()
                .map(|(i, content)| Column {
                    class: classes.get(i).copied().unwrap_or("col").to_string(),
                    content,
                })
                .collect();
            Component::Row { columns }
        }
        PluginKind::PageTitle { title, subtitle } => Component::PageTitle {
            title: title.clone(),
            subtitle: subtitle.clone(),
        },
        PluginKind::Countdown { title, target } => Component::Countdown {
            title: title.clone(),
            target: *target,
            seconds_left: (*target - ctx.now).num_seconds().max(0),
        },
        PluginKind::UpcomingEventsAndCourses => Component::Upcoming {
            events: ctx
                .events
                .iter()
                .filter(|e| e.display && e.date >= ctx.today())
                .cloned()
                .collect(),
            offerings: ctx
                .offerings
                .iter()
                .filter(|o| o.is_public())
                .cloned()
                .collect(),
        },
    }
}

/// Renders the top-level plugins of a placeholder in order.
pub fn render_placeholder(plugins: &[Plugin], ctx: &RenderContext) -> Vec<Component> {
    let mut roots: Vec<&Plugin> = plugins.iter().filter(|p| p.parent_id.is_none()).collect();
    roots.sort_by_key(|p| (p.position, p.id));
    roots
        .into_iter()
        .map(|root| render(root, plugins, ctx))
        .collect()
}

async fn render_context(repo: &Repo) -> Result<RenderContext, Error> {
    let now = Utc::now();
    Ok(RenderContext {
        events: repo.events_from(now.date_naive()).await?,
        offerings: repo.offerings().await?,
        now,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPlugin {
    pub plugin: Plugin,
    pub component: Component,
}

pub async fn plugin(
    Path(id): Path<i64>,
    Extension(repo): Extension<Repo>,
) -> Payload<RenderedPlugin> {
    let plugin = repo
        .plugin(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Plugin {} does not exist", id)))?;
    let siblings = repo.placeholder_plugins(plugin.placeholder_id).await?;
    let ctx = render_context(&repo).await?;
    proceeds(RenderedPlugin {
        component: render(&plugin, &siblings, &ctx),
        plugin,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPlaceholder {
    pub placeholder_id: i64,
    pub components: Vec<Component>,
}

pub async fn placeholder(
    Path(id): Path<i64>,
    Extension(repo): Extension<Repo>,
) -> Payload<RenderedPlaceholder> {
    let plugins = repo.placeholder_plugins(id).await?;
    let ctx = render_context(&repo).await?;
    proceeds(RenderedPlaceholder {
        placeholder_id: id,
        components: render_placeholder(&plugins, &ctx),
    })
}

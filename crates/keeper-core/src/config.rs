use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::{
  DEFAULT_TIMEZONE,
  parse_timezone
};
use crate::reconcile::ViewParams;
use crate::repository::DEFAULT_COLLECTION;
use crate::todo::OwnerId;

const RC_ENV_VAR: &str = "KEEPERRC";
const RC_FILE_NAME: &str = ".keeperrc";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.keeper"),
      ("owner", "local"),
      ("color", "on"),
      ("timezone", DEFAULT_TIMEZONE),
      (
        "store.collection",
        DEFAULT_COLLECTION
      ),
      ("list.status", "all"),
      ("list.priority", "all"),
      ("list.sort", "newest")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(keeperrc = %path.display(), "loading keeperrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no keeperrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Strict boolean lookup; `default` applies only when the key is unset.
  pub fn get_bool(
    &self,
    key: &str,
    default: bool
  ) -> anyhow::Result<bool> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(default);
    };
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "1" | "y" | "yes" | "on"
      | "true" => Ok(true),
      | "0" | "n" | "no" | "off"
      | "false" => Ok(false),
      | other => {
        Err(anyhow!(
          "invalid boolean for `{key}`: \
           {other}"
        ))
      }
    }
  }

  pub fn owner(
    &self
  ) -> anyhow::Result<OwnerId> {
    let raw = self
      .get("owner")
      .unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Err(anyhow!(
        "config key `owner` must not \
         be empty"
      ));
    }
    Ok(OwnerId::new(trimmed))
  }

  pub fn collection(&self) -> String {
    self
      .get("store.collection")
      .unwrap_or_else(|| {
        DEFAULT_COLLECTION.to_string()
      })
  }

  pub fn timezone(
    &self
  ) -> anyhow::Result<Tz> {
    let raw = self
      .get("timezone")
      .unwrap_or_else(|| {
        DEFAULT_TIMEZONE.to_string()
      });
    parse_timezone(&raw)
      .context("invalid `timezone` setting")
  }

  /// Default list view from `list.status`, `list.priority`, `list.sort`.
  pub fn view_params(
    &self
  ) -> anyhow::Result<ViewParams> {
    let get = |key: &str, fallback: &str| {
      self
        .get(key)
        .unwrap_or_else(|| {
          fallback.to_string()
        })
    };
    ViewParams::parse(
      &get("list.status", "all"),
      &get("list.priority", "all"),
      &get("list.sort", "newest")
    )
    .context("invalid list.* setting")
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map(|(before, _)| before)
        .unwrap_or(raw_line)
        .trim();
      if line.is_empty() {
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping keeperrc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".keeper"))
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

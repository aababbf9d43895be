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
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::holidays::{
  DEFAULT_COUNTRY,
  DEFAULT_ENDPOINT,
  DEFAULT_YEARS,
  HolidaySettings
};
use crate::query::DEFAULT_HISTORY_LIMIT;

const DEFAULTS: [(&str, &str); 7] = [
  ("data.location", "~/.almanac"),
  ("default.command", "month"),
  ("color", "on"),
  ("holidays.country", DEFAULT_COUNTRY),
  (
    "holidays.years",
    "2025,2026,2027"
  ),
  (
    "holidays.endpoint",
    DEFAULT_ENDPOINT
  ),
  ("query.history.limit", "20")
];

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
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

    let rc =
      resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading almanacrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no almanacrc found; using \
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

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn color_enabled(&self) -> bool {
    self
      .get_bool("color")
      .unwrap_or(true)
  }

  pub fn default_command(
    &self
  ) -> String {
    self
      .get("default.command")
      .filter(|cmd| !cmd.trim().is_empty())
      .unwrap_or_else(|| {
        "month".to_string()
      })
  }

  pub fn history_limit(&self) -> usize {
    match self
      .get("query.history.limit")
      .map(|raw| raw.trim().parse())
    {
      | Some(Ok(limit)) if limit > 0 => {
        limit
      }
      | Some(_) => {
        warn!(
          "invalid query.history.limit; \
           using default"
        );
        DEFAULT_HISTORY_LIMIT
      }
      | None => DEFAULT_HISTORY_LIMIT
    }
  }

  pub fn holiday_settings(
    &self
  ) -> anyhow::Result<HolidaySettings> {
    let country = self
      .get("holidays.country")
      .map(|c| c.trim().to_uppercase())
      .filter(|c| !c.is_empty())
      .unwrap_or_else(|| {
        DEFAULT_COUNTRY.to_string()
      });

    let years = match self
      .get("holidays.years")
    {
      | Some(raw) => parse_years(&raw)?,
      | None => DEFAULT_YEARS.to_vec()
    };

    let endpoint = self
      .get("holidays.endpoint")
      .filter(|e| !e.trim().is_empty())
      .unwrap_or_else(|| {
        DEFAULT_ENDPOINT.to_string()
      });

    Ok(HolidaySettings {
      country,
      years,
      endpoint
    })
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

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      // colours are written as `#rrggbb`,
      // so only ` #` starts a trailing
      // comment
      if let Some((before, _)) =
        line.split_once(" #")
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
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
    std::env::var("ALMANACRC")
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
    return Ok(None);
  };
  let candidate =
    home.join(".almanacrc");
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
  Ok(home.join(".almanac"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
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

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

fn parse_years(
  raw: &str
) -> anyhow::Result<Vec<i32>> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(|part| {
      part.parse::<i32>().with_context(
        || {
          format!(
            "invalid year in \
             holidays.years: {part}"
          )
        }
      )
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "holidays.country = us\n"
    )
    .expect("write include");
    let rc = dir.path().join("almanacrc");
    fs::write(
      &rc,
      "# calendar settings\n\
       holidays.years = 2030, 2031 # two years\n\
       include extra.rc\n\
       query.history.limit = 5\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load");
    cfg.apply_overrides([(
      "rc.color".to_string(),
      "off".to_string()
    )]);

    assert_eq!(cfg.loaded_files.len(), 2);
    assert!(!cfg.color_enabled());
    assert_eq!(cfg.history_limit(), 5);
    assert_eq!(
      cfg.default_command(),
      "month"
    );
    let holidays = cfg
      .holiday_settings()
      .expect("holidays");
    assert_eq!(holidays.country, "US");
    assert_eq!(holidays.years, vec![
      2030, 2031
    ]);
    assert_eq!(
      holidays.endpoint,
      DEFAULT_ENDPOINT
    );
  }

  #[test]
  fn bad_values_fall_back_or_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides([
      (
        "query.history.limit"
          .to_string(),
        "zero".to_string()
      ),
      (
        "holidays.years".to_string(),
        "2025,soon".to_string()
      )
    ]);
    assert_eq!(
      cfg.history_limit(),
      DEFAULT_HISTORY_LIMIT
    );
    assert!(
      cfg.holiday_settings().is_err()
    );
  }

  #[test]
  fn malformed_line_is_reported() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let rc = dir.path().join("almanacrc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    assert!(Config::load(Some(&rc)).is_err());
  }
}

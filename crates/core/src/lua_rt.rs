use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use mlua::prelude::*;

use crate::logger;
use crate::strategy::{Action, ActionId, Operation, Strategy, Trigger};
use crate::types::Point;

/// Recursively find every `main.lua` under `dir`, skipping dot-directories.
pub fn find_strategy_files(dir: &Path) -> Vec<PathBuf> {
    let mut results = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else { return results };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if !path.is_dir() {
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let main_lua = path.join("main.lua");
        if main_lua.is_file() {
            results.push(main_lua);
        } else {
            results.extend(find_strategy_files(&path));
        }
    }
    results
}

/// strategies/monkey-meadow/easy/main.lua -> monkey-meadow/easy
pub fn derive_strategy_name(path: &Path, root: &Path) -> String {
    let dir = path.parent().unwrap_or(path);
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    rel.to_string_lossy().replace('\\', "/")
}

/// Summary shown in the strategy list before anything runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyMeta {
    pub title: String,
    pub description: String,
    pub map: Option<String>,
    pub actions: usize,
}

fn lua_err(e: mlua::Error) -> anyhow::Error {
    anyhow!("{}", e)
}

/// `require` search path: next to the script first, then the strategies root.
fn package_path(path: &Path, root: &Path) -> String {
    let dir = path.parent().unwrap_or(root).to_string_lossy();
    let root = root.to_string_lossy();
    format!("{0}/?.lua;{0}/?/init.lua;{1}/?.lua;{1}/?/init.lua", dir, root)
}

/// Evaluate a strategy script and return the table it yields.
fn eval_script(lua: &Lua, path: &Path, root: &Path, tag: &str) -> Result<LuaTable> {
    register_globals(lua, tag).map_err(lua_err)?;

    let pkg: LuaTable = lua.globals().get("package").map_err(lua_err)?;
    pkg.set("path", package_path(path, root)).map_err(lua_err)?;

    let code = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    lua.load(&code)
        .set_name(path.to_string_lossy())
        .eval()
        .map_err(lua_err)
}

/// `root` is the strategies directory the script was discovered under.
pub fn load_meta(path: &Path, root: &Path) -> Result<StrategyMeta> {
    let lua = Lua::new();
    let table = eval_script(&lua, path, root, "")?;
    let actions: Option<LuaTable> = table.get("actions").map_err(lua_err)?;
    let hero: Option<LuaTable> = table.get("hero").map_err(lua_err)?;
    Ok(StrategyMeta {
        title: table.get::<Option<String>>("name").map_err(lua_err)?.unwrap_or_default(),
        description: table.get::<Option<String>>("description").map_err(lua_err)?.unwrap_or_default(),
        map: table.get("map").map_err(lua_err)?,
        actions: actions.map(|t| t.raw_len()).unwrap_or(0) + hero.map_or(0, |_| 1),
    })
}

/// Load and validate a strategy script.
///
/// ```lua
/// return {
///   name = "Monkey Meadow easy",
///   hero = { name = "Quincy", position = { x = 835, y = 415 } },
///   actions = {
///     { step = 1, at_money = 200, action = "buy", target = "Dart Monkey 01", position = { 440, 355 } },
///     { step = 2, after = "next_round", action = "upgrade", target = "Dart Monkey 01", upgrade_path = { p1 = 1 } },
///   },
/// }
/// ```
pub fn load_strategy(path: &Path, root: &Path, name: &str) -> Result<Strategy> {
    let lua = Lua::new();
    let table = eval_script(&lua, path, root, name)?;

    let mut actions = Vec::new();
    if let Some(hero) = table.get::<Option<LuaTable>>("hero").map_err(lua_err)? {
        actions.push(parse_hero(&hero).context("hero")?);
    }
    let list: LuaTable = table
        .get::<Option<LuaTable>>("actions")
        .map_err(lua_err)?
        .ok_or_else(|| anyhow!("{}: missing `actions` table", path.display()))?;
    for (i, entry) in list.sequence_values::<LuaTable>().enumerate() {
        let entry = entry.map_err(lua_err).with_context(|| format!("actions[{}]", i + 1))?;
        actions.push(parse_action(&entry, i as ActionId + 1).with_context(|| format!("actions[{}]", i + 1))?);
    }

    let mut strategy = Strategy::new(name, actions).with_context(|| format!("validating {}", path.display()))?;
    strategy.description = table.get::<Option<String>>("description").map_err(lua_err)?.unwrap_or_default();
    strategy.map = table.get("map").map_err(lua_err)?;
    strategy.difficulty = table.get("difficulty").map_err(lua_err)?;
    strategy.mode = table.get("mode").map_err(lua_err)?;
    logger::info_p("lua", &format!("loaded {} ({} actions)", name, strategy.len()));
    Ok(strategy)
}

fn parse_point(value: LuaValue) -> Result<Option<Point>> {
    match value {
        LuaValue::Nil => Ok(None),
        LuaValue::Table(t) => {
            let x: Option<i32> = t.get("x").map_err(lua_err)?;
            let y: Option<i32> = t.get("y").map_err(lua_err)?;
            match (x, y) {
                (Some(x), Some(y)) => Ok(Some(Point::new(x, y))),
                _ => {
                    let x: i32 = t.get(1).map_err(lua_err)?;
                    let y: i32 = t.get(2).map_err(lua_err)?;
                    Ok(Some(Point::new(x, y)))
                }
            }
        }
        other => bail!("position must be a table, got {}", other.type_name()),
    }
}

/// `{ p1 = 2, p3 = 1 }` or `{ 2, 0, 1 }`.
fn parse_upgrade_path(value: LuaValue) -> Result<[u8; 3]> {
    let t = match value {
        LuaValue::Table(t) => t,
        LuaValue::Nil => return Ok([0, 0, 0]),
        other => bail!("upgrade_path must be a table, got {}", other.type_name()),
    };
    let mut path = [0u8; 3];
    for (i, tier) in path.iter_mut().enumerate() {
        let named: Option<u8> = t.get(format!("p{}", i + 1)).map_err(lua_err)?;
        let positional: Option<u8> = t.get(i + 1).map_err(lua_err)?;
        *tier = named.or(positional).unwrap_or(0);
    }
    Ok(path)
}

fn parse_action(t: &LuaTable, default_step: ActionId) -> Result<Action> {
    let step: ActionId = t.get::<Option<ActionId>>("step").map_err(lua_err)?.unwrap_or(default_step);
    let op_name: String = t.get("action").map_err(lua_err)?;
    let operation = Operation::parse(&op_name).ok_or_else(|| anyhow!("unknown action '{}'", op_name))?;
    let target: String = t.get("target").map_err(lua_err)?;

    let after: Option<String> = t.get("after").map_err(lua_err)?;
    let trigger = match after.as_deref() {
        Some("next_round") => Trigger::NextRound,
        Some(other) => bail!("unknown trigger after = '{}'", other),
        None => Trigger::AtMoney(t.get::<Option<u64>>("at_money").map_err(lua_err)?.unwrap_or(0)),
    };

    Ok(Action {
        step,
        trigger,
        operation,
        target,
        position: parse_point(t.get("position").map_err(lua_err)?)?,
        hotkey: t.get("hotkey").map_err(lua_err)?,
        upgrade_path: parse_upgrade_path(t.get("upgrade_path").map_err(lua_err)?)?,
        confirm: t.get("confirm").map_err(lua_err)?,
        hero: t.get::<Option<bool>>("hero").map_err(lua_err)?.unwrap_or(false),
    })
}

/// The hero block becomes step 0: a free buy using the hero key.
fn parse_hero(t: &LuaTable) -> Result<Action> {
    let position = parse_point(t.get("position").map_err(lua_err)?)?
        .ok_or_else(|| anyhow!("hero needs a position"))?;
    Ok(Action {
        step: 0,
        trigger: Trigger::AtMoney(t.get::<Option<u64>>("at_money").map_err(lua_err)?.unwrap_or(0)),
        operation: Operation::Buy,
        target: t.get::<Option<String>>("name").map_err(lua_err)?.unwrap_or_else(|| "Hero".into()),
        position: Some(position),
        hotkey: t.get("hotkey").map_err(lua_err)?,
        upgrade_path: [0, 0, 0],
        confirm: None,
        hero: true,
    })
}

/// Register the F.* global table.
fn register_globals(lua: &Lua, tag: &str) -> mlua::Result<()> {
    let f_table = lua.create_table()?;

    // F.log(msg), prefixed with the strategy name
    let tag = tag.to_string();
    if !tag.is_empty() {
        logger::register_prefix(&tag, logger::COLOR_BLUE);
    }
    let log_fn = lua.create_function(move |_, msg: String| {
        if tag.is_empty() {
            logger::info_p("lua", &msg);
        } else {
            logger::info_p(&tag, &msg);
        }
        Ok(())
    })?;
    f_table.set("log", log_fn)?;

    // F.point(x, y) -> { x = x, y = y }
    let point_fn = lua.create_function(|lua, (x, y): (i32, i32)| {
        let t = lua.create_table()?;
        t.set("x", x)?;
        t.set("y", y)?;
        Ok(t)
    })?;
    f_table.set("point", point_fn)?;

    lua.globals().set("F", f_table)?;
    Ok(())
}

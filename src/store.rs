//! 应用目录存储：磁盘上的 JSON 数组，一把互斥锁串行化所有读改写

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_CATEGORY: &str = "Otros";
pub const DEFAULT_ICON: &str = "⬢";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

/// 目录中的一个应用
///
/// 缺失字段在加载时补默认值，旧文件无需迁移。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: u64,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub launch: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub download: String,
    /// Package Family Name，打开商店应用的后备方式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfn: Option<String>,
}

impl Default for AppEntry {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            command: String::new(),
            description: String::new(),
            category: default_category(),
            installed: false,
            launch: String::new(),
            icon: default_icon(),
            homepage: String::new(),
            download: String::new(),
            pfn: None,
        }
    }
}

/// 新增应用的请求体
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewApp {
    pub name: String,
    pub command: String,
    pub description: String,
    pub category: String,
    pub launch: String,
    pub icon: String,
    pub homepage: String,
    pub download: String,
}

impl NewApp {
    /// 去掉首尾空白；`name` 或 `command` 为空时返回错误信息
    pub fn normalized(self) -> Result<Self, String> {
        let app = Self {
            name: self.name.trim().to_string(),
            command: self.command.trim().to_string(),
            description: self.description.trim().to_string(),
            category: self.category.trim().to_string(),
            launch: self.launch.trim().to_string(),
            icon: self.icon.trim().to_string(),
            homepage: self.homepage.trim().to_string(),
            download: self.download.trim().to_string(),
        };
        if app.name.is_empty() || app.command.is_empty() {
            return Err("需要提供 'name' 和 'command'".to_string());
        }
        Ok(app)
    }
}

/// 描述性字段的部分更新；`id` 和 `installed` 不允许通过这里修改
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppPatch {
    pub name: Option<String>,
    pub command: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub launch: Option<String>,
    pub icon: Option<String>,
    pub homepage: Option<String>,
    pub download: Option<String>,
    pub pfn: Option<String>,
}

impl AppPatch {
    pub fn validate(&self) -> Result<(), String> {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&self.name) || blank(&self.command) {
            return Err("'name' 和 'command' 不能为空".to_string());
        }
        Ok(())
    }

    fn apply(self, app: &mut AppEntry) {
        let set = |field: &mut String, value: Option<String>| {
            if let Some(v) = value {
                *field = v.trim().to_string();
            }
        };
        set(&mut app.name, self.name);
        set(&mut app.command, self.command);
        set(&mut app.description, self.description);
        set(&mut app.launch, self.launch);
        set(&mut app.homepage, self.homepage);
        set(&mut app.download, self.download);
        if let Some(category) = self.category {
            let category = category.trim();
            app.category = if category.is_empty() {
                default_category()
            } else {
                category.to_string()
            };
        }
        if let Some(icon) = self.icon {
            let icon = icon.trim();
            app.icon = if icon.is_empty() {
                default_icon()
            } else {
                icon.to_string()
            };
        }
        if let Some(pfn) = self.pfn {
            let pfn = pfn.trim();
            app.pfn = (!pfn.is_empty()).then(|| pfn.to_string());
        }
    }
}

/// 线程安全的 JSON 应用目录
pub struct AppsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AppsStore {
    /// 打开目录文件，不存在时创建并写入默认条目
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path,
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            log::info!("应用目录不存在，写入默认条目: {}", store.path.display());
            write_apps(&store.path, &[default_entry()])?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 在阻塞线程池上执行一次目录操作，供异步调用方使用
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&AppsStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn list_apps(&self) -> Result<Vec<AppEntry>, StoreError> {
        let _guard = self.guard();
        read_apps(&self.path)
    }

    pub fn get_app(&self, id: u64) -> Result<Option<AppEntry>, StoreError> {
        let _guard = self.guard();
        Ok(read_apps(&self.path)?.into_iter().find(|app| app.id == id))
    }

    /// 新增应用，id 为当前最大 id + 1（空目录从 1 开始）
    pub fn add_app(&self, new_app: NewApp) -> Result<AppEntry, StoreError> {
        let _guard = self.guard();
        let mut apps = read_apps(&self.path)?;
        let next_id = apps.iter().map(|app| app.id).max().unwrap_or(0) + 1;

        let entry = AppEntry {
            id: next_id,
            name: new_app.name,
            command: new_app.command,
            description: new_app.description,
            category: if new_app.category.is_empty() {
                default_category()
            } else {
                new_app.category
            },
            installed: false,
            launch: new_app.launch,
            icon: if new_app.icon.is_empty() {
                default_icon()
            } else {
                new_app.icon
            },
            homepage: new_app.homepage,
            download: new_app.download,
            pfn: None,
        };
        apps.push(entry.clone());
        write_apps(&self.path, &apps)?;
        log::info!("新增应用 #{} {}", entry.id, entry.name);
        Ok(entry)
    }

    pub fn update_app(&self, id: u64, patch: AppPatch) -> Result<Option<AppEntry>, StoreError> {
        self.modify(id, |app| patch.apply(app))
    }

    pub fn mark_installed(&self, id: u64, installed: bool) -> Result<Option<AppEntry>, StoreError> {
        self.modify(id, |app| app.installed = installed)
    }

    fn modify<F>(&self, id: u64, f: F) -> Result<Option<AppEntry>, StoreError>
    where
        F: FnOnce(&mut AppEntry),
    {
        let _guard = self.guard();
        let mut apps = read_apps(&self.path)?;
        let Some(target) = apps.iter_mut().find(|app| app.id == id) else {
            return Ok(None);
        };
        f(target);
        let updated = target.clone();
        write_apps(&self.path, &apps)?;
        Ok(Some(updated))
    }
}

fn default_entry() -> AppEntry {
    AppEntry {
        id: 1,
        name: "Git".to_string(),
        command: "winget install --id Git.Git -e --source winget --accept-package-agreements --accept-source-agreements --silent".to_string(),
        description: "Cliente Git oficial por winget para clonar y contribuir a repos (instalacion silenciosa).".to_string(),
        category: "Control de versiones".to_string(),
        icon: "https://cdn.simpleicons.org/git/ffffff".to_string(),
        ..AppEntry::default()
    }
}

fn read_apps(path: &Path) -> Result<Vec<AppEntry>, StoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// 整体重写文件，不做追加写
fn write_apps(path: &Path, apps: &[AppEntry]) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(apps)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, AppsStore) {
        let dir = TempDir::new().unwrap();
        let store = AppsStore::open(dir.path().join("data").join("apps.json")).unwrap();
        (dir, store)
    }

    fn new_app(name: &str) -> NewApp {
        NewApp {
            name: name.to_string(),
            command: format!("winget install --id {}", name),
            ..NewApp::default()
        }
    }

    #[test]
    fn seeds_default_entry() {
        let (_dir, store) = store();
        let apps = store.list_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].id, 1);
        assert_eq!(apps[0].name, "Git");
        assert!(!apps[0].installed);
    }

    #[test]
    fn add_app_uses_max_id_plus_one() {
        let (_dir, store) = store();
        let a = store.add_app(new_app("Vendor.A")).unwrap();
        assert_eq!(a.id, 2);
        assert_eq!(a.category, DEFAULT_CATEGORY);
        assert_eq!(a.icon, DEFAULT_ICON);

        // 手工写入不连续的 id，新 id 跟在最大值后面
        let mut apps = store.list_apps().unwrap();
        apps.retain(|app| app.id != 1);
        apps[0].id = 10;
        write_apps(store.path(), &apps).unwrap();
        assert_eq!(store.add_app(new_app("Vendor.B")).unwrap().id, 11);
    }

    #[test]
    fn add_app_on_empty_catalog_starts_at_one() {
        let (_dir, store) = store();
        write_apps(store.path(), &[]).unwrap();
        assert_eq!(store.add_app(new_app("Vendor.A")).unwrap().id, 1);
    }

    #[test]
    fn defaults_applied_on_load() {
        let (_dir, store) = store();
        fs::write(
            store.path(),
            r#"[{"id": 3, "name": "Old", "command": "winget install --id Old.App", "extra": 1}]"#,
        )
        .unwrap();
        let app = store.get_app(3).unwrap().unwrap();
        assert!(!app.installed);
        assert_eq!(app.launch, "");
        assert_eq!(app.icon, DEFAULT_ICON);
        assert_eq!(app.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn mark_installed_persists() {
        let (_dir, store) = store();
        let updated = store.mark_installed(1, true).unwrap().unwrap();
        assert!(updated.installed);
        assert!(store.get_app(1).unwrap().unwrap().installed);
        assert!(store.mark_installed(99, true).unwrap().is_none());
    }

    #[test]
    fn update_app_keeps_installed_flag() {
        let (_dir, store) = store();
        store.mark_installed(1, true).unwrap();
        let patch = AppPatch {
            launch: Some("  git-bash.exe ".to_string()),
            category: Some(String::new()),
            pfn: Some("Git.Git_8wekyb3d8bbwe".to_string()),
            ..AppPatch::default()
        };
        let app = store.update_app(1, patch).unwrap().unwrap();
        assert!(app.installed);
        assert_eq!(app.launch, "git-bash.exe");
        assert_eq!(app.category, DEFAULT_CATEGORY);
        assert_eq!(app.pfn.as_deref(), Some("Git.Git_8wekyb3d8bbwe"));
    }

    #[test]
    fn new_app_validation() {
        assert!(NewApp::default().normalized().is_err());
        let app = NewApp {
            name: "  Git ".to_string(),
            command: " winget install --id Git.Git ".to_string(),
            ..NewApp::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(app.name, "Git");
        assert_eq!(app.command, "winget install --id Git.Git");
    }

    #[test]
    fn patch_rejects_blank_required_fields() {
        let patch = AppPatch {
            name: Some("   ".to_string()),
            ..AppPatch::default()
        };
        assert!(patch.validate().is_err());
        assert!(AppPatch::default().validate().is_ok());
    }

    #[tokio::test]
    async fn blocking_runs_on_worker_pool() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let updated = store
            .blocking(|s| s.mark_installed(1, true))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.installed);

        let apps = store.blocking(|s| s.list_apps()).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert!(apps[0].installed);
    }
}

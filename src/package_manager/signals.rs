//! 多语言文本信号表
//!
//! 只放数据，不放控制流。新增语言或别名时只需扩充这里的表。

/// "已经安装 / 没有可用更新" 类短语（匹配前统一转小写）
pub const ALREADY_INSTALLED: &[&str] = &[
    // es
    "ya instalado",
    "ya se encuentra instalado",
    "no se ha encontrado ninguna actualización disponible",
    "no hay versiones más recientes",
    "paquete existente ya instalado",
    // en
    "already installed",
    "no applicable update",
    "no updates available",
    "no update available",
    "latest version already installed",
    // pt
    "nenhuma atualização disponível",
    "já está instalado",
    // de
    "keine aktualisierung verfügbar",
    "bereits installiert",
    "paket bereits installiert",
    // fr
    "pas de mise à jour disponible",
    "déjà installé",
];

/// "找不到已安装的包" 类短语；命中时跳过当前探测命令，而不是判定为未安装
pub const NOT_INSTALLED: &[&str] = &[
    "no se encuentra ningun paquete instalado",
    "no se encuentra ningún paquete instalado",
    "no se encuentra ningun paquete instalado que coincida con los criterios de entrada",
    "no se encuentra ningún paquete instalado que coincida con los criterios de entrada",
    "no installed package found",
    "no installed package found matching input criteria",
    "no packages found",
    "no package found",
    "no se encontró el paquete",
];

/// `winget show` 输出里 "Version:" 字段在各语言下的写法
pub const VERSION_FIELD_LABELS: &[&str] = &["Version", "Versión", "Versão"];

/// 包 ID 或显示名与目录名对不上的知名应用
///
/// `trigger` 出现在包 ID 或名称（小写）中时，`keywords` 全部加入候选关键词。
pub struct AliasGroup {
    pub trigger: &'static str,
    pub keywords: &'static [&'static str],
}

pub const ALIAS_GROUPS: &[AliasGroup] = &[
    AliasGroup {
        trigger: "chrome",
        keywords: &["google chrome", "chrome", "chromedev"],
    },
    AliasGroup {
        trigger: "chatgpt",
        keywords: &[
            "chatgpt",
            "openai.chatgpt",
            "chatgptdesktop",
            "chatgpt-desktop",
            "openai.chatgpt-desktop",
        ],
    },
];

/// 名称含歧义词的应用，额外追加一次宽泛的按名称查询
pub struct BroadQuery {
    pub trigger: &'static str,
    pub query: &'static str,
}

pub const BROAD_QUERIES: &[BroadQuery] = &[BroadQuery {
    trigger: "chatgpt",
    query: "ChatGPT",
}];

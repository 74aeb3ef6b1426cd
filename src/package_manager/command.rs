//! 外部 shell 调用参数构造

/// 构造非交互式 PowerShell 调用参数（含程序名）
///
/// 不加载 profile、不显示 logo、绕过执行策略，并在执行命令前把控制台输出编码切到 UTF-8。
pub fn build_ps_command(shell: &str, command: &str) -> Vec<String> {
    vec![
        shell.to_string(),
        "-NoLogo".to_string(),
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
        format!(
            "[Console]::OutputEncoding=[System.Text.Encoding]::UTF8; {}",
            command
        ),
    ]
}

/// 放进 PowerShell 双引号字符串前转义反引号、双引号和 `$`
pub fn ps_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '`' | '"' | '$') {
            quoted.push('`');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(ps_quote("Visual Studio Code"), "\"Visual Studio Code\"");
        assert_eq!(ps_quote("a\"b$c`d"), "\"a`\"b`$c``d\"");
    }

    #[test]
    fn wraps_command_with_utf8_prefix() {
        let argv = build_ps_command("powershell", "winget list --id Git.Git");
        assert_eq!(argv[0], "powershell");
        assert!(argv.contains(&"-NoProfile".to_string()));
        assert!(argv.contains(&"Bypass".to_string()));
        assert_eq!(
            argv.last().map(String::as_str),
            Some("[Console]::OutputEncoding=[System.Text.Encoding]::UTF8; winget list --id Git.Git")
        );
    }

    #[test]
    fn empty_command_still_builds() {
        let argv = build_ps_command("pwsh", "");
        assert_eq!(argv.len(), 7);
        assert_eq!(argv[0], "pwsh");
    }
}

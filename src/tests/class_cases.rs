#[cfg(test)]
mod tests {
    use crate::class::SmaliClass;
    use crate::config::Config;
    use crate::error::SmaliError;
    use crate::instruction::InstructionType;
    use crate::method::MethodKind;
    use crate::types::Modifier;
    use std::fs;
    use std::path::Path;

    const ACTIVITY: &str = r#".class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;
.source "MainActivity.java"

# instance fields
.field private counter:I

# direct methods
.method public constructor <init>()V
    .registers 1

    .prologue
    .line 12
    invoke-direct {p0}, Landroid/app/Activity;-><init>()V

    return-void
.end method

.method static constructor <clinit>()V
    .locals 0

    return-void
.end method

# virtual methods
.method protected onCreate(Landroid/os/Bundle;)V
    .locals 3
    .param p1, "savedInstanceState"    # Landroid/os/Bundle;
        .annotation build Landroid/support/annotation/Nullable;
        .end annotation
    .end param

    .line 20
    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V

    const/4 v0, 0x3
    new-array v0, v0, [I
    fill-array-data v0, :array_0

    invoke-static {}, Landroid/telephony/SmsManager;->getDefault()Landroid/telephony/SmsManager;
    move-result-object v1

    return-void

    :array_0
    .array-data 4
        0x1
        0x2
        0x3
    .end array-data
.end method

.method public native secret(I)I
.end method
"#;

    #[test]
    fn activity_methods() {
        let c = SmaliClass::from_smali(ACTIVITY).unwrap();
        let kinds: Vec<MethodKind> = c.all_methods().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![MethodKind::Constructor, MethodKind::StaticInitializer, MethodKind::Normal, MethodKind::Normal]
        );
        assert_eq!(c.methods().count(), 3);
        let native = c.empty_methods().next().unwrap();
        assert_eq!(native.signature(), "secret(I)I");
        assert!(native.modifiers().contains(&Modifier::Native));
        assert!(native.cfg_error().is_none());
    }

    #[test]
    fn payloads_and_annotations_stay_out_of_code() {
        let c = SmaliClass::from_smali(ACTIVITY).unwrap();
        let m = c.find_method("onCreate").unwrap();
        assert_eq!(m.blocks().len(), 1);
        let block = &m.blocks()[0];
        assert!(!block.has_dead_code());
        assert!(!m.is_probably_patched());

        let payload = c.block_lines(block).find(|l| l.bytes() == b"0x2").unwrap();
        assert_eq!(payload.instruction().kind(), InstructionType::Data);
        let annotation = c.block_lines(block).find(|l| l.starts_with(b".end annotation")).unwrap();
        assert_eq!(annotation.instruction().kind(), InstructionType::Annotation);

        // invoke-super, const, new-array, fill-array-data, invoke-static, move-result, return
        assert_eq!(m.code_line_count(), 7);
        assert_eq!(m.locals(), Some(3));
    }

    #[test]
    fn invoke_operands_are_available() {
        let c = SmaliClass::from_smali(ACTIVITY).unwrap();
        let m = c.find_method("onCreate").unwrap();
        let calls: Vec<String> = c
            .method_lines(m)
            .filter(|l| l.instruction().kind() == InstructionType::InvokeStatic)
            .filter_map(|l| l.instruction().invoke_target().map(|t| t.to_string()))
            .collect();
        assert_eq!(
            calls,
            vec!["Landroid/telephony/SmsManager;->getDefault()Landroid/telephony/SmsManager;".to_string()]
        );
    }

    #[test]
    fn lines_know_their_method() {
        let c = SmaliClass::from_smali(ACTIVITY).unwrap();
        let m = c.find_method("onCreate").unwrap();
        assert!(c.method_lines(m).all(|l| l.method() == Some(m.label())));
        let field = c.lines().iter().find(|l| l.starts_with(b".field")).unwrap();
        assert_eq!(field.method(), None);
        let mut numbers = c.lines().iter().map(|l| l.line_nr());
        let mut previous = 0;
        assert!(numbers.all(|n| {
            let increasing = n == previous + 1;
            previous = n;
            increasing
        }));
    }

    #[test]
    fn permission_tag_on_line() {
        let c = SmaliClass::from_smali(ACTIVITY).unwrap();
        let line = c.lines().iter().find(|l| l.contains(b"SmsManager;->getDefault")).unwrap();
        assert!(line.set_permission("android.permission.SEND_SMS"));
        assert_eq!(line.permission(), Some("android.permission.SEND_SMS"));
    }

    #[test]
    fn crlf_input() {
        let smali = ACTIVITY.replace('\n', "\r\n");
        let c = SmaliClass::from_smali(&smali).unwrap();
        assert_eq!(c.class_name(), "com.example.app.MainActivity");
        assert_eq!(c.source_file(), Some("MainActivity.java"));
        assert_eq!(c.lines().len(), ACTIVITY.lines().count());
        assert_eq!(c.methods().count(), 3);
    }

    #[test]
    fn parse_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MainActivity.smali");
        fs::write(&path, ACTIVITY).unwrap();

        let c = SmaliClass::parse(&path, &Config::default(), 4).unwrap();
        assert_eq!(c.file_path(), path.as_path());
        assert_eq!(c.label(), 4);
        assert_eq!(c.unique_block_id(2, 0), "4-2-0");
        assert_eq!(c.fields().len(), 1);
    }

    #[test]
    fn file_over_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MainActivity.smali");
        fs::write(&path, ACTIVITY).unwrap();

        let config = Config { max_file_size: 64, ..Config::default() };
        match SmaliClass::parse(&path, &config, 0) {
            Err(SmaliError::SizeExceeded { path: p, limit }) => {
                assert_eq!(p, path);
                assert_eq!(limit, 64);
            }
            other => panic!("unexpected result {:?}", other.map(|c| c.class_name().to_string())),
        }
    }

    #[test]
    fn missing_file() {
        let e = SmaliClass::parse(Path::new("/nonexistent/Nope.smali"), &Config::default(), 0).unwrap_err();
        assert!(matches!(e, SmaliError::Io { .. }));
        assert!(e.to_string().starts_with("Error loading file /nonexistent/Nope.smali"));
    }
}

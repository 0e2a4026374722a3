use std::{
    ffi::OsStr,
    fs,
    process::{Command, exit},
};

const KERNEL_PACKAGE: &str = "bringup_kernel";
const KERNEL_TARGET: &str = "kernel/i686-bringup.json";
const KERNEL_TARGET_NAME: &str = "i686-bringup";
const IMAGE_PATH: &str = "bringup-i686.img";
const IMAGE_SIZE_MIB: u32 = 64;

fn exec<C>(command: C)
where
    C: AsRef<str>,
{
    exece(command.as_ref(), std::iter::empty::<(&str, &str)>());
}

fn exece<C, E, K, V>(command: C, env: E)
where
    C: ToString,
    E: Iterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let command = command.to_string();
    let mut words = command.split_whitespace();

    let program = words.next().expect("command should not be empty");

    let status = Command::new(program)
        .args(words)
        .envs(env)
        .spawn()
        .unwrap_or_else(|error| {
            eprintln!("could not run {program}: {error}");
            exit(1);
        })
        .wait()
        .unwrap();

    if !status.success() {
        eprintln!("'{command}' failed with {status}");
        exit(status.code().unwrap_or(1));
    }
}

pub fn main() {
    let mut args = std::env::args();

    args.next().expect("program should be the first argument");

    let mut rust_profile = "dev".to_string();
    let mut only_build = false;
    let mut cores = 4u32;
    let mut boot_sector = "boot/boot.bin".to_string();
    let mut clippy = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "only" => {
                if args.next().is_none_or(|x| x.as_str() != "build") {
                    eprintln!("expected 'build' after 'only'");
                    exit(1);
                }

                only_build = true;
            }

            "with" => {
                let Some(key) = args.next() else {
                    eprintln!("expected a key");
                    exit(1);
                };

                match key.as_str() {
                    "profile" => {
                        rust_profile = args.next().unwrap_or_else(|| {
                            eprintln!("expected a rust profile");
                            exit(1);
                        });
                    }

                    "cores" => {
                        cores = match args.next().map(|x| x.parse::<u32>()) {
                            Some(Ok(n)) if (1..=4).contains(&n) => n,

                            _ => {
                                eprintln!("expected a core count between 1 and 4");
                                exit(1);
                            }
                        };
                    }

                    "boot" => {
                        boot_sector = args.next().unwrap_or_else(|| {
                            eprintln!("expected a boot sector image");
                            exit(1);
                        });
                    }

                    "clippy" => clippy = true,

                    _ => {
                        eprintln!("unknown key: {key}");
                        exit(1);
                    }
                }
            }

            _ => {
                eprintln!("unknown command: {arg}");
                exit(1);
            }
        }
    }

    let rust_profile_subdir = match rust_profile.as_str() {
        "dev" => "debug",
        "release" => "release",

        _ => {
            eprintln!("unknown rust profile: {rust_profile}");
            exit(1);
        }
    };

    let build_std = "-Z build-std=core,compiler_builtins -Z build-std-features=compiler-builtins-mem";
    let rust_flags = [("RUSTFLAGS", "-C relocation-model=static -Z stack-protector=strong")];

    if clippy {
        exece(
            format!("cargo clippy -p {KERNEL_PACKAGE} --target {KERNEL_TARGET} {build_std}"),
            rust_flags.into_iter(),
        );

        return;
    }

    exece(
        format!(
            "cargo build -p {KERNEL_PACKAGE} --target {KERNEL_TARGET} --profile {rust_profile} {build_std}"
        ),
        rust_flags.into_iter(),
    );

    let kernel_elf = format!("target/{KERNEL_TARGET_NAME}/{rust_profile_subdir}/{KERNEL_PACKAGE}");

    exec(format!("objcopy -O binary {kernel_elf} kernel/kernel.bin"));

    if fs::exists(IMAGE_PATH).is_ok_and(|exists| exists) {
        fs::remove_file(IMAGE_PATH).unwrap();
    }

    exec(format!(
        "dd if=/dev/zero bs=1M count=0 seek={IMAGE_SIZE_MIB} of={IMAGE_PATH}"
    ));

    exec(format!(
        "cargo run -p bringup_installer --bin bootinstall -- -v -b {boot_sector} -p kernel/kernel.bin {IMAGE_PATH}"
    ));

    if !only_build {
        exec(format!(
            "qemu-system-i386 -m 128M -smp {cores} -drive format=raw,file={IMAGE_PATH}"
        ));
    }
}

#[cfg(test)]
mod tests {
    const TARGET_SPEC: &str = include_str!("../../kernel/i686-bringup.json");
    const TOOLCHAIN: &str = include_str!("../../rust-toolchain.toml");

    fn field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
        text.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(key))
            .map(|rest| rest.trim_start_matches([' ', ':', '=']).trim_end_matches(','))
            .map(|value| value.trim_matches('"'))
    }

    #[test]
    fn toolchain_is_pinned_to_a_dated_nightly() {
        let channel = field(TOOLCHAIN, "channel").unwrap();
        let date = channel.strip_prefix("nightly-").unwrap();

        assert_eq!(date.len(), "yyyy-mm-dd".len());
        assert!(date.split('-').all(|part| part.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn target_uses_the_soft_float_abi() {
        assert_eq!(field(TARGET_SPEC, "\"rustc-abi\""), Some("softfloat"));
        assert_eq!(field(TARGET_SPEC, "\"arch\""), Some("x86"));
        assert!(field(TARGET_SPEC, "\"features\"").unwrap().contains("+soft-float"));
    }
}

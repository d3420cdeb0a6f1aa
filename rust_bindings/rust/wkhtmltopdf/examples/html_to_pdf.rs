use std::path::PathBuf;
use std::process;
use wkhtmltopdf::{Converter, Wkhtmltopdf};

fn print_usage() {
    eprintln!("Usage: html_to_pdf [OPTIONS] <PAGE>...");
    eprintln!();
    eprintln!("Pages are URLs or file paths, rendered in order.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --output <PATH>        Output PDF file (default: out.pdf)");
    eprintln!("  --cover <HTML>         Inline HTML rendered before the pages");
    eprintln!("  --set <KEY=VALUE>      Global setting (can be used multiple times)");
    eprintln!("  --object <KEY=VALUE>   Setting applied to every page (can be used multiple times)");
    eprintln!("  --simple               Use the one-shot API for the --cover HTML only");
    eprintln!("  --help                 Print this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  html_to_pdf --output site.pdf https://example.com");
    eprintln!();
    eprintln!("  html_to_pdf --output report.pdf \\");
    eprintln!("    --set size.paperSize=A4 --set orientation=Landscape \\");
    eprintln!("    --cover '<h1>Report</h1>' chapter1.html chapter2.html");
}

fn parse_pair(flag: &str, raw: &str) -> (String, String) {
    match raw.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => {
            eprintln!("Error: {} expects KEY=VALUE, got '{}'", flag, raw);
            process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Parse arguments
    let mut output_path = PathBuf::from("out.pdf");
    let mut cover: Option<String> = None;
    let mut global: Vec<(String, String)> = Vec::new();
    let mut object: Vec<(String, String)> = Vec::new();
    let mut pages: Vec<String> = Vec::new();
    let mut use_simple = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            flag @ ("--output" | "--cover" | "--set" | "--object") => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: {} requires a value", flag);
                    process::exit(1);
                }
                let value = &args[i];
                match flag {
                    "--output" => output_path = PathBuf::from(value),
                    "--cover" => cover = Some(value.clone()),
                    "--set" => global.push(parse_pair(flag, value)),
                    _ => object.push(parse_pair(flag, value)),
                }
            }
            "--simple" => use_simple = true,
            other if other.starts_with("--") => {
                eprintln!("Error: Unknown option: {}", other);
                print_usage();
                process::exit(1);
            }
            page => pages.push(page.to_string()),
        }
        i += 1;
    }

    if pages.is_empty() && cover.is_none() {
        eprintln!("Error: nothing to convert");
        print_usage();
        process::exit(1);
    }

    let pdf = match Wkhtmltopdf::init(false) {
        Ok(pdf) => pdf,
        Err(e) => {
            eprintln!("✗ Failed to initialize wkhtmltopdf: {}", e);
            process::exit(1);
        }
    };
    println!("wkhtmltopdf {}", pdf.version());

    if use_simple {
        let html = cover.unwrap_or_default();
        match pdf.html_to_pdf(&html) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&output_path, &bytes) {
                    eprintln!("✗ Failed to write {}: {}", output_path.display(), e);
                    process::exit(1);
                }
                println!("✓ Wrote {} bytes to {}", bytes.len(), output_path.display());
            }
            Err(e) => {
                eprintln!("✗ Conversion failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let result = build_converter(&pdf, &global, &object, cover.as_deref(), &pages)
        .and_then(|mut converter| {
            converter.convert()?;
            converter.save(&output_path)
        });

    match result {
        Ok(bytes) => println!("\n✓ Wrote {} bytes to {}", bytes, output_path.display()),
        Err(e) => {
            eprintln!("\n✗ Conversion failed: {}", e);
            process::exit(1);
        }
    }
}

fn build_converter(
    pdf: &Wkhtmltopdf,
    global: &[(String, String)],
    object: &[(String, String)],
    cover: Option<&str>,
    pages: &[String],
) -> wkhtmltopdf::Result<Converter> {
    let mut settings = pdf.global_settings()?;
    settings.apply(global.iter().map(|(k, v)| (k, v)))?;

    let mut converter = pdf.converter(settings)?;
    converter
        .on_progress_changed(|_, percent| print!("\r{:3}%", percent))
        .on_phase_changed(|conv| {
            if let Ok(phase) = conv.current_phase() {
                println!("\n[{}] {}", phase.index, phase.description);
            }
        })
        .on_warning(|_, message| eprintln!("\nwarning: {}", message))
        .on_error(|conv, message| {
            let code = conv.http_error_code().unwrap_or(0);
            eprintln!("\nerror (http {}): {}", code, message);
        });

    if let Some(html) = cover {
        let mut settings = pdf.object_settings()?;
        settings.apply(object.iter().map(|(k, v)| (k, v)))?;
        converter.attach_inline(settings, html)?;
    }
    for page in pages {
        let mut settings = pdf.object_settings()?;
        settings.apply(object.iter().map(|(k, v)| (k, v)))?;
        settings.set("page", page)?;
        converter.attach(settings)?;
    }

    Ok(converter)
}

use leakscope::Tracer;

fn main() {
  let tracer = Tracer::builder().report_on_exit(false).finish();

  let leaked = Box::leak(Box::new([0_u8; 256]));
  tracer.watch(leaked.as_ptr(), 256);

  let freed = Box::new([0_u8; 64]);
  tracer.watch(freed.as_ptr(), 64);
  tracer.forget(freed.as_ptr());

  let stats = tracer.stats();

  println!("=== demo stats ===");
  println!(
    "live={} bytes={} peak={}",
    stats.live_count, stats.live_bytes, stats.peak_bytes
  );

  println!("{}", tracer.report());
}
